//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use remutex::Config;
use remutex::HandlerKind;
use remutex::LockStore;
use remutex::MemoryLockStore;
use remutex::MutexContext;
use remutex::ScriptReply;
use remutex::StoreError;
use remutex::Subscription;

/// A context ("process") over a shared store, with an explicit handler.
pub async fn context_on(store: &MemoryLockStore, handler: HandlerKind) -> Arc<MutexContext> {
    let config = Config {
        handler,
        store: Some(Arc::new(store.clone())),
        ..Config::default()
    };
    MutexContext::setup(config).await.expect("setup failed")
}

/// Fresh store plus one context on it.
pub async fn memory_context(handler: HandlerKind) -> (MemoryLockStore, Arc<MutexContext>) {
    let store = MemoryLockStore::new();
    let ctx = context_on(&store, handler).await;
    (store, ctx)
}

/// Store wrapper whose subscriptions drop one message and fail on command,
/// for exercising the watcher's reconnect path.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryLockStore,
    fail_next_delivery: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: MemoryLockStore) -> Self {
        Self {
            inner,
            fail_next_delivery: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every open subscription swallow its next delivered message and
    /// report a connection error instead.
    pub fn kill_next_delivery(&self) {
        self.fail_next_delivery.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.inner.set_if_absent(key, value).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError> {
        self.inner.compare_and_swap(key, expected, value).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn expire_at(&self, key: &str, deadline_ms: u64) -> Result<bool, StoreError> {
        self.inner.expire_at(key, deadline_ms).await
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError> {
        let inner = self.inner.subscribe(channel).await?;
        Ok(Box::new(FlakySubscription {
            inner,
            fail_next_delivery: Arc::clone(&self.fail_next_delivery),
        }))
    }

    async fn now_ms(&self) -> Result<u64, StoreError> {
        self.inner.now_ms().await
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        self.inner.script_load(source).await
    }

    async fn script_exists(&self, handle: &str) -> Result<bool, StoreError> {
        self.inner.script_exists(handle).await
    }

    async fn eval(&self, handle: &str, keys: &[String], args: &[String]) -> Result<ScriptReply, StoreError> {
        self.inner.eval(handle, keys, args).await
    }
}

struct FlakySubscription {
    inner: Box<dyn Subscription>,
    fail_next_delivery: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for FlakySubscription {
    async fn next_message(&mut self) -> Result<Vec<u8>, StoreError> {
        let payload = self.inner.next_message().await?;
        if self.fail_next_delivery.swap(false, Ordering::SeqCst) {
            // The message is lost with the connection.
            return Err(StoreError::Connection {
                reason: "injected subscription failure".to_string(),
            });
        }
        Ok(payload)
    }
}
