//! Redis backend for remutex.
//!
//! Implements the [`remutex_core::LockStore`] contract against a Redis server:
//! pooled exclusive connections for commands and guarded transactions, a
//! dedicated connection per pub/sub subscription, and the bundled scripts
//! evaluated server-side by handle.

mod pool;
mod store;
mod subscription;

pub use store::RedisLockStore;
