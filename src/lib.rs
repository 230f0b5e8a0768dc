//! Distributed advisory mutex over a shared key-value store.
//!
//! remutex coordinates exclusive access to named resources across machines,
//! processes, and tasks. One acquisition may cover many names atomically, so
//! multi-resource critical sections never deadlock through incremental
//! acquisition. Leases expire mandatorily and can be refreshed explicitly;
//! waiters wake through a pub/sub signal channel instead of polling.
//!
//! # Example
//!
//! ```ignore
//! use remutex::{Config, DistributedMutex, MutexContext};
//!
//! let ctx = MutexContext::setup(Config::from_url("redis://127.0.0.1/")).await?;
//! let mutex = DistributedMutex::new(&ctx, ["reports", "exports"])?;
//!
//! mutex.synchronize(None, || async {
//!     // both names are held here
//! }).await?;
//! ```
//!
//! # Architecture
//!
//! - [`MutexContext`]: the process-wide runtime built by `setup` (store
//!   handle, resolved protocol handler, signal queue, watcher).
//! - [`DistributedMutex`]: the facade with lock/try_lock/unlock, refresh,
//!   synchronize, and condition-style sleep/wakeup.
//! - Protocol handlers: optimistic-CAS for stores without server-side
//!   scripting, scripted for one-round-trip atomic operations; selected (or
//!   probed) at setup.
//! - Watcher: one subscription per process translating release messages
//!   into local wakeups, with automatic reconnection.
//!
//! Store backends implement [`LockStore`]: [`RedisLockStore`] for production,
//! [`MemoryLockStore`] for deterministic tests.

mod config;
mod context;
mod error;
mod handler;
mod mutex;
mod names;
mod owner;
mod signal;
mod timer;
mod watcher;

pub use config::Config;
pub use config::DEFAULT_EXPIRE;
pub use config::DEFAULT_RECONNECT_MAX;
pub use config::HandlerKind;
pub use config::Retries;
pub use context::MutexContext;
pub use error::MutexError;
pub use mutex::DistributedMutex;
pub use mutex::MutexOptions;
pub use owner::current_task_id;

pub use remutex_core::Lease;
pub use remutex_core::LockStore;
pub use remutex_core::MemoryLockStore;
pub use remutex_core::ScriptReply;
pub use remutex_core::SimulatedTimeProvider;
pub use remutex_core::StoreError;
pub use remutex_core::Subscription;
pub use remutex_core::SystemTimeProvider;
pub use remutex_core::TimeProvider;
pub use remutex_redis::RedisLockStore;

/// Channel every release is announced on, shared by all handlers and
/// processes. Message payloads are JSON arrays of released full names.
pub const SIGNAL_CHANNEL: &str = "remutex";
