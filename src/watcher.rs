//! Release-message watcher.
//!
//! One long-lived subscription per process turns release messages published by
//! any process into local wakeups. The watcher owns a dedicated store
//! connection (subscription mode precludes other commands) and absorbs every
//! transient store error through its reconnect loop; callers never see them.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use remutex_core::LockStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::config::Retries;
use crate::error::MutexError;
use crate::signal::SignalQueue;
use crate::timer;

/// Delay before the first reconnect attempt: short, so a transient blip does
/// not stall waiters.
const RECONNECT_FIRST_DELAY: Duration = Duration::from_millis(100);
/// Delay before every subsequent attempt: long enough to avoid reconnect
/// storms.
const RECONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Handle to the per-process watcher task.
pub(crate) struct Watcher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    pid: u32,
}

impl Watcher {
    /// Subscribe and spawn the dispatch task.
    ///
    /// The initial subscription is established inline so setup fails fast
    /// with a [`MutexError::Protocol`] when the channel cannot be watched.
    /// Any release that happened while no watcher was running is covered by
    /// waking every queued waiter once the subscription is live.
    pub(crate) async fn start(
        store: Arc<dyn LockStore>,
        signals: Arc<SignalQueue>,
        channel: String,
        reconnect_max: Retries,
        watching: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
    ) -> Result<Self, MutexError> {
        let subscription = store.subscribe(&channel).await.map_err(|e| MutexError::Protocol {
            reason: format!("watcher could not subscribe to '{channel}': {e}"),
        })?;
        watching.store(true, Ordering::SeqCst);
        stopped.store(false, Ordering::SeqCst);
        signals.wake_all();
        info!(%channel, "watcher subscribed");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher_task(
            store,
            signals,
            channel,
            reconnect_max,
            subscription,
            cancel.clone(),
            watching,
            stopped,
        ));
        Ok(Self {
            cancel,
            task,
            pid: std::process::id(),
        })
    }

    /// Process id the watcher was started in, for fork detection.
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Cancel the task and wait for it to exit.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
        info!("watcher stopped");
    }

    /// Cancel without waiting. Used after a fork, where the task handle
    /// belongs to the parent's runtime and must not be awaited.
    pub(crate) fn abandon(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn watcher_task(
    store: Arc<dyn LockStore>,
    signals: Arc<SignalQueue>,
    channel: String,
    reconnect_max: Retries,
    initial: Box<dyn remutex_core::Subscription>,
    cancel: CancellationToken,
    watching: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
) {
    let mut subscription = Some(initial);
    let mut attempts: u32 = 0;

    'session: loop {
        let mut active = match subscription.take() {
            Some(sub) => sub,
            None => {
                attempts += 1;
                if let Retries::Limit(max) = reconnect_max
                    && attempts > max
                {
                    warn!(attempts = attempts - 1, "watcher giving up after repeated reconnect failures");
                    stopped.store(true, Ordering::SeqCst);
                    break;
                }
                let delay = if attempts == 1 {
                    RECONNECT_FIRST_DELAY
                } else {
                    RECONNECT_RETRY_DELAY
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer::sleep(delay) => {}
                }
                match store.subscribe(&channel).await {
                    Ok(sub) => {
                        attempts = 0;
                        watching.store(true, Ordering::SeqCst);
                        info!(%channel, "watcher resubscribed");
                        // Releases published while offline were missed; every
                        // waiter re-polls.
                        signals.wake_all();
                        sub
                    }
                    Err(e) => {
                        warn!(error = %e, attempt = attempts, "watcher reconnect failed");
                        continue 'session;
                    }
                }
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    watching.store(false, Ordering::SeqCst);
                    return;
                }
                message = active.next_message() => match message {
                    Ok(payload) => dispatch(&signals, &payload),
                    Err(e) => {
                        warn!(error = %e, "watcher subscription lost");
                        watching.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }
    }
    watching.store(false, Ordering::SeqCst);
}

/// Decode a release message and wake one head-of-line waiter per name.
fn dispatch(signals: &SignalQueue, payload: &[u8]) {
    match serde_json::from_slice::<Vec<String>>(payload) {
        Ok(names) => {
            for name in names {
                signals.signal_one(&name);
            }
        }
        Err(e) => warn!(error = %e, "ignoring malformed release message"),
    }
}
