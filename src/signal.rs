//! In-process waiter registry.
//!
//! One entry per full name holding the ordered wakeup senders of local tasks
//! waiting on that name. The watcher pops and fires at most one head-of-line
//! sender per released name, which gives informal FIFO within a process
//! without a thundering herd. Entries exist only while at least one live
//! waiter is registered; dead senders (their task timed out and dropped the
//! receiver) are swept on the way.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::oneshot;
use tracing::debug;

type Waiters = HashMap<String, VecDeque<oneshot::Sender<()>>>;

/// Process-wide map of name → ordered waiters, shared by every mutex instance
/// of a context.
#[derive(Default)]
pub(crate) struct SignalQueue {
    waiters: Mutex<Waiters>,
}

impl SignalQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a waiter at the tail of `name`'s queue.
    pub(crate) fn register(&self, name: &str, sender: oneshot::Sender<()>) {
        let mut waiters = self.lock();
        waiters.entry(name.to_string()).or_default().push_back(sender);
    }

    /// Sweep closed senders from `name`'s queue, removing the entry when it
    /// empties. Called by a waiter after it stops waiting for any reason.
    pub(crate) fn unregister(&self, name: &str) {
        let mut waiters = self.lock();
        if let Some(queue) = waiters.get_mut(name) {
            queue.retain(|sender| !sender.is_closed());
            if queue.is_empty() {
                waiters.remove(name);
            }
        }
    }

    /// Wake the head-of-line waiter on `name`, skipping dead senders.
    /// Returns whether a waiter was actually woken.
    pub(crate) fn signal_one(&self, name: &str) -> bool {
        let mut waiters = self.lock();
        let Some(queue) = waiters.get_mut(name) else {
            return false;
        };
        let mut woken = false;
        while let Some(sender) = queue.pop_front() {
            if sender.send(()).is_ok() {
                woken = true;
                break;
            }
        }
        if queue.is_empty() {
            waiters.remove(name);
        }
        if woken {
            debug!(name, "woke head-of-line waiter");
        }
        woken
    }

    /// Wake every queued waiter (used after a resubscribe, when releases may
    /// have been missed while offline).
    pub(crate) fn wake_all(&self) {
        let mut waiters = self.lock();
        for (_, queue) in waiters.drain() {
            for sender in queue {
                let _ = sender.send(());
            }
        }
    }

    /// Drop all waiters without waking them (fork handling: the child
    /// inherits no local tasks).
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered waiters, dead senders included.
    pub(crate) fn waiting(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }
}
