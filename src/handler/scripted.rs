//! Server-script protocol handler.
//!
//! Each operation is one script evaluation: check, claim, publish all happen
//! server-side in a single round trip. Scripts are loaded on first use and
//! invoked by handle; a handle evicted from the server cache (store restart)
//! is reloaded transparently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remutex_core::Lease;
use remutex_core::LockStore;
use remutex_core::ScriptReply;
use remutex_core::StoreError;
use remutex_core::scripts;
use tokio::sync::Mutex;
use tracing::debug;

use super::Handler;
use super::lock_with_wait;
use crate::error::MutexError;
use crate::signal::SignalQueue;

#[derive(Clone, Copy)]
enum Script {
    TryLock,
    Unlock,
    Refresh,
}

impl Script {
    fn source(self) -> &'static str {
        match self {
            Script::TryLock => scripts::TRY_LOCK,
            Script::Unlock => scripts::UNLOCK,
            Script::Refresh => scripts::REFRESH,
        }
    }
}

#[derive(Default)]
struct Handles {
    try_lock: Option<String>,
    unlock: Option<String>,
    refresh: Option<String>,
}

impl Handles {
    fn slot(&mut self, script: Script) -> &mut Option<String> {
        match script {
            Script::TryLock => &mut self.try_lock,
            Script::Unlock => &mut self.unlock,
            Script::Refresh => &mut self.refresh,
        }
    }
}

pub(crate) struct ScriptedHandler {
    store: Arc<dyn LockStore>,
    signals: Arc<SignalQueue>,
    channel: String,
    handles: Mutex<Handles>,
}

impl ScriptedHandler {
    pub(crate) fn new(store: Arc<dyn LockStore>, signals: Arc<SignalQueue>, channel: String) -> Self {
        Self {
            store,
            signals,
            channel,
            handles: Mutex::new(Handles::default()),
        }
    }

    async fn handle(&self, script: Script) -> Result<String, MutexError> {
        let mut handles = self.handles.lock().await;
        let slot = handles.slot(script);
        if let Some(handle) = slot {
            return Ok(handle.clone());
        }
        let handle = self.store.script_load(script.source()).await?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    async fn reload(&self, script: Script) -> Result<String, MutexError> {
        let handle = self.store.script_load(script.source()).await?;
        *self.handles.lock().await.slot(script) = Some(handle.clone());
        Ok(handle)
    }

    async fn eval(&self, script: Script, keys: &[String], args: &[String]) -> Result<ScriptReply, MutexError> {
        let handle = self.handle(script).await?;
        match self.store.eval(&handle, keys, args).await {
            Err(StoreError::ScriptMissing { .. }) => {
                debug!("script cache miss, reloading");
                let handle = self.reload(script).await?;
                Ok(self.store.eval(&handle, keys, args).await?)
            }
            other => Ok(other?),
        }
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn try_lock(&self, names: &[String], owner: &str, lease: Duration) -> Result<bool, MutexError> {
        let now = self.store.now_ms().await?;
        let deadline_ms = now + lease.as_millis() as u64;
        let value = Lease::new(owner, deadline_ms).encode();
        let args = vec![value, owner.to_string(), deadline_ms.to_string()];

        let reply = self.eval(Script::TryLock, names, &args).await?;
        match reply.as_int() {
            Some(outcome) => Ok(outcome == 1),
            None => Err(MutexError::Protocol {
                reason: format!("try-lock script returned {reply:?}"),
            }),
        }
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
        let args = vec![owner.to_string(), self.channel.clone()];
        let reply = self.eval(Script::Unlock, names, &args).await?;
        let released = reply.clone().into_string_list().ok_or_else(|| MutexError::Protocol {
            reason: format!("unlock script returned {reply:?}"),
        })?;
        if released.is_empty() { Ok(None) } else { Ok(Some(released)) }
    }

    async fn refresh(&self, names: &[String], owner: &str, lease: Duration) -> Result<bool, MutexError> {
        let now = self.store.now_ms().await?;
        let deadline_ms = now + lease.as_millis() as u64;
        let value = Lease::new(owner, deadline_ms).encode();
        let args = vec![value, owner.to_string(), deadline_ms.to_string()];

        let reply = self.eval(Script::Refresh, names, &args).await?;
        match reply.as_int() {
            Some(updated) => Ok(updated == names.len() as i64),
            None => Err(MutexError::Protocol {
                reason: format!("refresh script returned {reply:?}"),
            }),
        }
    }

    fn can_refresh_expired(&self) -> bool {
        true
    }
}
