//! Pub/sub subscription over a dedicated Redis connection.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::PubSub;

use remutex_core::StoreError;
use remutex_core::Subscription;

pub(crate) struct RedisSubscription {
    pubsub: PubSub,
}

impl RedisSubscription {
    pub(crate) fn new(pubsub: PubSub) -> Self {
        Self { pubsub }
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Result<Vec<u8>, StoreError> {
        let message = self.pubsub.on_message().next().await;
        match message {
            Some(msg) => Ok(msg.get_payload_bytes().to_vec()),
            // The stream only ends when the connection is gone; the caller
            // resubscribes on a fresh connection.
            None => Err(StoreError::Connection {
                reason: "subscription stream ended".to_string(),
            }),
        }
    }
}
