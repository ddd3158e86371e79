//! Publish/subscribe transport used by the bus provider and the remote agent

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::error::ProviderError;

/// Stream of raw payloads delivered on one topic
pub type BusSubscription = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// A topic-based message bus
///
/// Delivery is at-most-once. Payloads published before a subscription exists
/// are not replayed to it.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProviderError>;

    /// Subscribe to every payload published on `topic` from now on
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, ProviderError>;
}

const TOPIC_CAPACITY: usize = 256;

/// In-process bus backed by one broadcast channel per topic
#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProviderError> {
        // No subscribers is not an error on a pub/sub bus
        if self.sender(topic).send(payload).is_err() {
            trace!(topic, "published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, ProviderError> {
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();
        let stream = futures::stream::unfold((rx, topic), |(mut rx, topic)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, topic))),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %topic, skipped = n, "bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
