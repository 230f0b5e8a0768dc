//! Store contract and shared protocol types for remutex.
//!
//! This crate defines everything the lock protocol and a store backend agree
//! on, without depending on either side:
//!
//! - [`LockStore`] / [`Subscription`] - the command surface a backend provides
//! - [`Lease`] - the value format stored under each lock name
//! - [`scripts`] - the bundled server-side scripts (part of the wire contract)
//! - [`StoreError`] - backend error taxonomy
//! - [`TimeProvider`] - injectable clocks for deterministic tests
//! - [`MemoryLockStore`] - a deterministic in-memory backend for tests

mod error;
mod lease;
mod memory;
pub mod scripts;
mod store;
mod time;

pub use error::StoreError;
pub use lease::LEASE_SEPARATOR;
pub use lease::Lease;
pub use memory::MemoryLockStore;
pub use store::LockStore;
pub use store::ScriptReply;
pub use store::Subscription;
pub use time::SimulatedTimeProvider;
pub use time::SystemTimeProvider;
pub use time::TimeProvider;
pub use time::current_time_ms;
