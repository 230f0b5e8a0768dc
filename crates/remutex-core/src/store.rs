//! The store command surface the lock protocol consumes.
//!
//! [`LockStore`] abstracts the handful of single-key primitives, the pub/sub
//! channel, and the optional server-side scripting facility the protocol
//! handlers are built on. The guarded operations (`compare_and_swap`,
//! `compare_and_delete`) abort on concurrent modification rather than
//! retrying, which is what the optimistic handler's rollback discipline
//! requires.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// Reply from a server-side script evaluation.
///
/// A small subset of the store's reply types: the bundled scripts only return
/// integers and lists of byte strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    /// Absent / nil reply.
    Nil,
    /// Integer reply.
    Int(i64),
    /// Byte-string reply.
    Data(Vec<u8>),
    /// Array reply.
    List(Vec<ScriptReply>),
}

impl ScriptReply {
    /// Interpret the reply as an integer (nil counts as 0).
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptReply::Int(n) => Some(*n),
            ScriptReply::Nil => Some(0),
            _ => None,
        }
    }

    /// Interpret the reply as a list of UTF-8 strings (nil counts as empty).
    pub fn into_string_list(self) -> Option<Vec<String>> {
        match self {
            ScriptReply::Nil => Some(Vec::new()),
            ScriptReply::List(items) => items
                .into_iter()
                .map(|item| match item {
                    ScriptReply::Data(bytes) => String::from_utf8(bytes).ok(),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

/// A live pub/sub subscription on one channel.
///
/// Obtained from [`LockStore::subscribe`]; backed by a dedicated store
/// connection, since subscription mode precludes other commands on the same
/// connection. Errors from [`next_message`](Subscription::next_message) mean
/// the connection is gone and the caller must resubscribe.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message payload on the channel.
    async fn next_message(&mut self) -> Result<Vec<u8>, StoreError>;
}

/// Store primitives the lock protocol is built on.
///
/// One key per lock name; values are opaque lease strings. Implementations
/// must make each method atomic with respect to concurrent callers, but no
/// atomicity is assumed *across* calls; that is the handlers' job.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key` only if the key is absent. Returns whether
    /// the write happened.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Replace the value under `key` with `value` only if the current value
    /// equals `expected`, aborting on concurrent change. Clears any key
    /// expiry, like an unconditional store would.
    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError>;

    /// Delete `key` only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Delete `key` unconditionally. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Arm server-side expiry so `key` vanishes at `deadline_ms` (Unix
    /// milliseconds). Returns false if the key does not exist.
    async fn expire_at(&self, key: &str, deadline_ms: u64) -> Result<bool, StoreError>;

    /// Publish `payload` to every subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// Open a dedicated subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError>;

    /// The store's own clock in Unix milliseconds.
    ///
    /// All lease deadlines are computed from this clock; client clocks are
    /// only trusted for local wait timeouts.
    async fn now_ms(&self) -> Result<u64, StoreError>;

    /// Load a server-side script, returning an opaque handle for
    /// [`eval`](LockStore::eval). Stores without scripting return
    /// [`StoreError::Unsupported`].
    async fn script_load(&self, source: &str) -> Result<String, StoreError>;

    /// Whether the script behind `handle` is cached server-side.
    ///
    /// Also doubles as the scripting-support probe: an
    /// [`StoreError::Unsupported`] reply means scripts cannot be used at all.
    async fn script_exists(&self, handle: &str) -> Result<bool, StoreError>;

    /// Evaluate a previously loaded script against `keys` and `args`.
    ///
    /// Returns [`StoreError::ScriptMissing`] when the handle is no longer
    /// cached (store restart); callers reload and retry.
    async fn eval(&self, handle: &str, keys: &[String], args: &[String]) -> Result<ScriptReply, StoreError>;
}

#[async_trait]
impl<T: LockStore + ?Sized> LockStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        (**self).set_if_absent(key, value).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError> {
        (**self).compare_and_swap(key, expected, value).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        (**self).compare_and_delete(key, expected).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn expire_at(&self, key: &str, deadline_ms: u64) -> Result<bool, StoreError> {
        (**self).expire_at(key, deadline_ms).await
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError> {
        (**self).publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError> {
        (**self).subscribe(channel).await
    }

    async fn now_ms(&self) -> Result<u64, StoreError> {
        (**self).now_ms().await
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        (**self).script_load(source).await
    }

    async fn script_exists(&self, handle: &str) -> Result<bool, StoreError> {
        (**self).script_exists(handle).await
    }

    async fn eval(&self, handle: &str, keys: &[String], args: &[String]) -> Result<ScriptReply, StoreError> {
        (**self).eval(handle, keys, args).await
    }
}
