//! The lock protocol behind the facade.
//!
//! Two interchangeable handlers implement the same four primitives. The
//! blocking acquisition loop is shared between them and lives here.

mod optimistic;
mod scripted;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remutex_core::Lease;
use remutex_core::LockStore;
use tokio::sync::oneshot;
use tracing::debug;

pub(crate) use optimistic::OptimisticHandler;
pub(crate) use scripted::ScriptedHandler;

use crate::error::MutexError;
use crate::signal::SignalQueue;
use crate::timer;

/// Retry delay when every requested name looked free but the claim still
/// lost its race.
const LOST_RACE_RETRY: Duration = Duration::from_millis(10);

/// One protocol implementation.
///
/// All operations act on full (namespaced) names. `try_lock` must be
/// all-or-nothing: a failed attempt leaves no partial claims behind.
#[async_trait]
pub(crate) trait Handler: Send + Sync {
    /// Claim every name atomically, or none. Never blocks.
    async fn try_lock(&self, names: &[String], owner: &str, lease: Duration) -> Result<bool, MutexError>;

    /// Block until every name is claimed, or until `block` elapses (returns
    /// false). Fails with [`MutexError::Deadlock`] when `owner` already holds
    /// one of the names.
    async fn lock(
        &self,
        names: &[String],
        owner: &str,
        lease: Duration,
        block: Option<Duration>,
    ) -> Result<bool, MutexError>;

    /// Release the names whose stored value still belongs to `owner`,
    /// publish the released set, and return it (`None` when nothing was
    /// released).
    async fn unlock(&self, names: &[String], owner: &str) -> Result<Option<Vec<String>>, MutexError>;

    /// Extend the lease deadline on every name still owned. Returns false
    /// once ownership has been lost.
    async fn refresh(&self, names: &[String], owner: &str, lease: Duration) -> Result<bool, MutexError>;

    /// Whether `refresh` can reclaim a lease whose deadline has passed while
    /// the stored owner is still this one.
    fn can_refresh_expired(&self) -> bool;
}

/// Read and parse the lease under `name`. Returns the raw stored string
/// alongside the parse so guarded operations can match on the exact value.
pub(crate) async fn read_lease(
    store: &Arc<dyn LockStore>,
    name: &str,
) -> Result<Option<(String, Lease)>, MutexError> {
    match store.get(name).await? {
        None => Ok(None),
        Some(raw) => {
            let lease = Lease::parse(&raw).map_err(|e| MutexError::Protocol {
                reason: format!("lease under '{name}': {e}"),
            })?;
            Ok(Some((raw, lease)))
        }
    }
}

/// Shared blocking loop for both handlers.
///
/// Waiters register under the *first* name only: any wakeup triggers a retry
/// that attempts every name, and the earliest-deadline hint bounds the extra
/// latency when only a later name is released.
pub(crate) async fn lock_with_wait(
    handler: &dyn Handler,
    store: &Arc<dyn LockStore>,
    signals: &Arc<SignalQueue>,
    names: &[String],
    owner: &str,
    lease: Duration,
    block: Option<Duration>,
) -> Result<bool, MutexError> {
    let deadline = block.map(|d| tokio::time::Instant::now() + d);

    loop {
        // Inspect current holders before attempting: reentrance fails fast
        // (the scripted claim would otherwise quietly extend the caller's own
        // lease), and the earliest live deadline caps how long to wait
        // without a signal.
        let now = store.now_ms().await?;
        let mut earliest: Option<u64> = None;
        for name in names {
            if let Some((_, current)) = read_lease(store, name).await? {
                if current.is_expired(now) {
                    continue;
                }
                if current.owner == owner {
                    return Err(MutexError::Deadlock { name: name.clone() });
                }
                earliest = Some(earliest.map_or(current.deadline_ms, |d| d.min(current.deadline_ms)));
            }
        }

        // Register before attempting: a release landing between a failed
        // attempt and registration would otherwise go unobserved until the
        // expiry hint fires.
        let (sender, receiver) = oneshot::channel();
        signals.register(&names[0], sender);

        match handler.try_lock(names, owner, lease).await {
            Ok(false) => {}
            outcome => {
                // Close the receiver first so the sweep can collect the
                // sender.
                drop(receiver);
                signals.unregister(&names[0]);
                return outcome;
            }
        }

        let hint = match earliest {
            Some(deadline_ms) => Duration::from_millis(deadline_ms.saturating_sub(now).max(1)),
            None => LOST_RACE_RETRY,
        };
        debug!(name = %names[0], hint_ms = hint.as_millis() as u64, "waiting for release");

        let keep_waiting = suspend(receiver, hint, deadline).await;
        // Re-registration happens at the tail on the next pass; sweep the
        // spent sender either way.
        signals.unregister(&names[0]);

        if !keep_waiting {
            return Ok(false);
        }
    }
}

/// Park until a release signal, the expiry hint, or the caller's block
/// deadline. Returns false only when the block deadline was reached.
async fn suspend(
    receiver: oneshot::Receiver<()>,
    hint: Duration,
    deadline: Option<tokio::time::Instant>,
) -> bool {
    let block_expiry = async {
        match deadline {
            Some(at) => timer::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = receiver => true,
        _ = timer::sleep(hint) => true,
        _ = block_expiry => false,
    }
}
