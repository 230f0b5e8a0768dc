//! Optimistic-CAS protocol handler.
//!
//! Uses only primitive store commands, for stores without server-side
//! scripting. Multi-name atomicity comes from claim-then-roll-back: every
//! name this attempt claimed is deleted (guarded, so a concurrent takeover
//! is never clobbered) before reporting failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remutex_core::Lease;
use remutex_core::LockStore;
use tracing::debug;

use super::Handler;
use super::lock_with_wait;
use super::read_lease;
use crate::error::MutexError;
use crate::signal::SignalQueue;

pub(crate) struct OptimisticHandler {
    store: Arc<dyn LockStore>,
    signals: Arc<SignalQueue>,
    channel: String,
}

impl OptimisticHandler {
    pub(crate) fn new(store: Arc<dyn LockStore>, signals: Arc<SignalQueue>, channel: String) -> Self {
        Self { store, signals, channel }
    }

    /// Claim one name: set-if-absent, or guarded takeover of an expired
    /// lease. Returns whether the name now carries `value`.
    async fn claim(&self, name: &str, value: &str, now_ms: u64) -> Result<bool, MutexError> {
        if self.store.set_if_absent(name, value).await? {
            return Ok(true);
        }
        match read_lease(&self.store, name).await? {
            // Vanished between the set and the read; one more chance.
            None => Ok(self.store.set_if_absent(name, value).await?),
            Some((raw, current)) => {
                if current.is_expired(now_ms) {
                    // Guarded: aborts if anyone else replaced it first.
                    Ok(self.store.compare_and_swap(name, &raw, value).await?)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

#[async_trait]
impl Handler for OptimisticHandler {
    async fn try_lock(&self, names: &[String], owner: &str, lease: Duration) -> Result<bool, MutexError> {
        let now = self.store.now_ms().await?;
        let deadline_ms = now + lease.as_millis() as u64;
        let value = Lease::new(owner, deadline_ms).encode();

        let mut claimed = Vec::with_capacity(names.len());
        for name in names {
            if self.claim(name, &value, now).await? {
                claimed.push(name);
                continue;
            }
            // All or nothing: undo this attempt's claims.
            for undone in &claimed {
                self.store.compare_and_delete(undone, &value).await?;
            }
            debug!(name = %name, "multi-lock attempt lost, rolled back");
            return Ok(false);
        }

        for name in names {
            self.store.expire_at(name, deadline_ms).await?;
        }
        Ok(true)
    }

    async fn lock(
        &self,
        names: &[String],
        owner: &str,
        lease: Duration,
        block: Option<Duration>,
    ) -> Result<bool, MutexError> {
        lock_with_wait(self, &self.store, &self.signals, names, owner, lease, block).await
    }

    async fn unlock(&self, names: &[String], owner: &str) -> Result<Option<Vec<String>>, MutexError> {
        let mut released = Vec::new();
        for name in names {
            if let Some((raw, current)) = read_lease(&self.store, name).await? {
                if current.owner == owner && self.store.compare_and_delete(name, &raw).await? {
                    released.push(name.clone());
                }
            }
        }
        if released.is_empty() {
            return Ok(None);
        }
        let payload = serde_json::to_vec(&released).map_err(|e| MutexError::Protocol {
            reason: format!("release payload encoding failed: {e}"),
        })?;
        self.store.publish(&self.channel, &payload).await?;
        Ok(Some(released))
    }

    async fn refresh(&self, names: &[String], owner: &str, lease: Duration) -> Result<bool, MutexError> {
        let now = self.store.now_ms().await?;

        // Verify full ownership first; an expired lease cannot be refreshed
        // here, only re-acquired.
        let mut current = Vec::with_capacity(names.len());
        for name in names {
            match read_lease(&self.store, name).await? {
                Some((raw, existing)) if existing.owner == owner && !existing.is_expired(now) => {
                    current.push((name, raw));
                }
                _ => return Ok(false),
            }
        }

        let deadline_ms = now + lease.as_millis() as u64;
        let value = Lease::new(owner, deadline_ms).encode();
        for (name, raw) in current {
            if !self.store.compare_and_swap(name, &raw, &value).await? {
                return Ok(false);
            }
            self.store.expire_at(name, deadline_ms).await?;
        }
        Ok(true)
    }

    fn can_refresh_expired(&self) -> bool {
        false
    }
}
