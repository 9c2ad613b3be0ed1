use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use crier_entities::CommsChannel;

use crate::types::{DeliveryItem, DeliveryResult};

/// A delivery backend for one channel. Adapters never error as a whole:
/// transport trouble surfaces as per-recipient deferred/failed outcomes so
/// the scheduler can record each recipient individually.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> CommsChannel;

    /// Whether the backing provider has enough configuration to send.
    fn is_configured(&self) -> bool;

    /// Deliver a batch. Returns exactly one result per input item, in input
    /// order. Concurrency across batches is the scheduler's concern.
    async fn send_batch(&self, items: &[DeliveryItem]) -> Vec<DeliveryResult>;
}

/// Channel → adapter lookup shared through the service registry. Plugins
/// insert their adapters during registration (the in-app adapter lives with
/// the notification store, not here), so the map is populated incrementally.
#[derive(Default)]
pub struct ChannelRegistry {
    adapters: RwLock<HashMap<CommsChannel, Arc<dyn ChannelAdapter>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        let channel = adapter.channel();
        let mut adapters = self
            .adapters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if adapters.insert(channel, adapter).is_some() {
            tracing::warn!(channel = channel.as_str(), "Replaced channel adapter");
        }
    }

    pub fn get(&self, channel: CommsChannel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&channel)
            .cloned()
    }

    /// Configuration state per registered channel, for the health endpoint.
    pub fn channel_states(&self) -> Vec<(CommsChannel, bool)> {
        let adapters = self
            .adapters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut states: Vec<(CommsChannel, bool)> = adapters
            .values()
            .map(|a| (a.channel(), a.is_configured()))
            .collect();
        states.sort_by_key(|(channel, _)| channel.as_str());
        states
    }
}
