//! Deterministic in-memory [`LockStore`] for tests.
//!
//! A single-process stand-in for the real store: one `BTreeMap` behind a
//! mutex with lazy key expiry against an injectable clock, per-channel
//! broadcast pub/sub, and native execution of the bundled scripts (dispatched
//! on their marker line, run atomically under the same mutex, which is the
//! atomicity the real server gives a script).
//!
//! Clones share state, so several contexts can observe one simulated server
//! the way several processes observe one store.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::lease::Lease;
use crate::scripts;
use crate::store::LockStore;
use crate::store::ScriptReply;
use crate::store::Subscription;
use crate::time::SystemTimeProvider;
use crate::time::TimeProvider;

/// Broadcast capacity per channel; a lagging watcher resumes on the next
/// message rather than erroring.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at_ms: Option<u64>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, StoredValue>,
    scripts: Vec<String>,
    channels: HashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl State {
    /// Drop the entry under `key` if its server-side expiry has passed.
    fn prune(&mut self, key: &str, now_ms: u64) {
        if let Some(stored) = self.entries.get(key)
            && let Some(deadline) = stored.expires_at_ms
            && deadline <= now_ms
        {
            self.entries.remove(key);
        }
    }

    fn sender(&mut self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// In-memory store shared by every clone.
#[derive(Clone)]
pub struct MemoryLockStore {
    state: Arc<Mutex<State>>,
    time: Arc<dyn TimeProvider>,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_time(Arc::new(SystemTimeProvider))
    }

    /// Create a store on an injected clock.
    pub fn with_time(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            time,
        }
    }

    fn now(&self) -> u64 {
        self.time.now_unix_ms()
    }

    /// Execute one bundled script natively. Runs under the state lock, so the
    /// whole script is atomic with respect to every other store operation.
    fn run_script(
        &self,
        state: &mut State,
        source: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, StoreError> {
        let now_ms = self.now();
        match scripts::marker_of(source) {
            Some(scripts::TRY_LOCK_MARKER) => {
                let [lease_value, owner, deadline] = expect_args::<3>(args, "try_lock")?;
                let deadline_ms = parse_deadline(deadline)?;
                for key in keys {
                    state.prune(key, now_ms);
                    if let Some(stored) = state.entries.get(key)
                        && let Ok(lease) = Lease::parse(&stored.value)
                        && lease.owner != *owner
                        && !lease.is_expired(now_ms)
                    {
                        return Ok(ScriptReply::Int(0));
                    }
                }
                for key in keys {
                    state.entries.insert(key.clone(), StoredValue {
                        value: lease_value.clone(),
                        expires_at_ms: Some(deadline_ms),
                    });
                }
                Ok(ScriptReply::Int(1))
            }
            Some(scripts::UNLOCK_MARKER) => {
                let [owner, channel] = expect_args::<2>(args, "unlock")?;
                let mut released = Vec::new();
                for key in keys {
                    state.prune(key, now_ms);
                    if let Some(stored) = state.entries.get(key)
                        && let Ok(lease) = Lease::parse(&stored.value)
                        && lease.owner == *owner
                    {
                        state.entries.remove(key);
                        released.push(key.clone());
                    }
                }
                if !released.is_empty() {
                    let payload = serde_json::to_vec(&released).map_err(|e| StoreError::Protocol {
                        reason: format!("release payload encoding failed: {e}"),
                    })?;
                    let _ = state.sender(channel).send(payload);
                }
                Ok(ScriptReply::List(
                    released.into_iter().map(|name| ScriptReply::Data(name.into_bytes())).collect(),
                ))
            }
            Some(scripts::REFRESH_MARKER) => {
                let [lease_value, owner, deadline] = expect_args::<3>(args, "refresh")?;
                let deadline_ms = parse_deadline(deadline)?;
                let mut updated = 0;
                for key in keys {
                    state.prune(key, now_ms);
                    if let Some(stored) = state.entries.get_mut(key)
                        && let Ok(lease) = Lease::parse(&stored.value)
                        && lease.owner == *owner
                    {
                        stored.value = lease_value.clone();
                        stored.expires_at_ms = Some(deadline_ms);
                        updated += 1;
                    }
                }
                Ok(ScriptReply::Int(updated))
            }
            _ => Err(StoreError::Unsupported {
                operation: "eval of a non-bundled script".to_string(),
            }),
        }
    }
}

fn expect_args<'a, const N: usize>(args: &'a [String], script: &str) -> Result<[&'a String; N], StoreError> {
    let slice: &[String; N] = args.try_into().map_err(|_| StoreError::Protocol {
        reason: format!("{script} script expects {N} arguments, got {}", args.len()),
    })?;
    Ok(std::array::from_fn(|i| &slice[i]))
}

fn parse_deadline(raw: &str) -> Result<u64, StoreError> {
    raw.parse().map_err(|_| StoreError::Protocol {
        reason: format!("malformed script deadline: {raw:?}"),
    })
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.prune(key, self.now());
        Ok(state.entries.get(key).map(|stored| stored.value.clone()))
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.prune(key, self.now());
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state.entries.insert(key.to_string(), StoredValue {
            value: value.to_string(),
            expires_at_ms: None,
        });
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.prune(key, self.now());
        match state.entries.get(key) {
            Some(stored) if stored.value == expected => {
                // A plain store clears expiry; callers re-arm it.
                state.entries.insert(key.to_string(), StoredValue {
                    value: value.to_string(),
                    expires_at_ms: None,
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.prune(key, self.now());
        match state.entries.get(key) {
            Some(stored) if stored.value == expected => {
                state.entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.prune(key, self.now());
        Ok(state.entries.remove(key).is_some())
    }

    async fn expire_at(&self, key: &str, deadline_ms: u64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.prune(key, self.now());
        match state.entries.get_mut(key) {
            Some(stored) => {
                stored.expires_at_ms = Some(deadline_ms);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        // No subscribers is not an error, same as the real store.
        let _ = state.sender(channel).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError> {
        let mut state = self.state.lock().await;
        let receiver = state.sender(channel).subscribe();
        Ok(Box::new(MemorySubscription { receiver }))
    }

    async fn now_ms(&self) -> Result<u64, StoreError> {
        Ok(self.now())
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        let mut state = self.state.lock().await;
        state.scripts.push(source.to_string());
        Ok(format!("mem:{}", state.scripts.len() - 1))
    }

    async fn script_exists(&self, handle: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(lookup(&state.scripts, handle).is_some())
    }

    async fn eval(&self, handle: &str, keys: &[String], args: &[String]) -> Result<ScriptReply, StoreError> {
        let mut state = self.state.lock().await;
        let source = lookup(&state.scripts, handle).ok_or_else(|| StoreError::ScriptMissing {
            handle: handle.to_string(),
        })?;
        self.run_script(&mut state, &source, keys, args)
    }
}

fn lookup(scripts: &[String], handle: &str) -> Option<String> {
    let index: usize = handle.strip_prefix("mem:")?.parse().ok()?;
    scripts.get(index).cloned()
}

struct MemorySubscription {
    receiver: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Vec<u8>, StoreError> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(payload),
                // Missed messages are recovered by the caller's re-poll.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(StoreError::Closed),
            }
        }
    }
}
