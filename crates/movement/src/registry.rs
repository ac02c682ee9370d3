use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::buffer::EventBuffer;
use crate::config::Config;
use crate::marker::{MarkerResolver, Step};

/// Owns the event buffers of a tracking session, one per channel.
///
/// All buffers publish to a single step stream.
#[derive(Clone)]
pub struct BufferRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    buffers: DashMap<String, EventBuffer>,
    resolver: Arc<dyn MarkerResolver>,
    config: Config,
    steps: broadcast::Sender<Step>,
}

impl BufferRegistry {
    #[must_use]
    pub fn new(resolver: Arc<dyn MarkerResolver>, config: Config) -> Self {
        let (steps, _) = broadcast::channel(config.step_capacity.max(1));
        Self {
            inner: Arc::new(Inner { buffers: DashMap::new(), resolver, config, steps }),
        }
    }

    /// Return the started buffer for `channel_id`, creating it if needed.
    pub fn get_or_create(&self, channel_id: &str) -> EventBuffer {
        let buffer = self
            .inner
            .buffers
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel_id, "creating event buffer");
                EventBuffer::with_sender(
                    channel_id,
                    Arc::clone(&self.inner.resolver),
                    self.inner.config.clone(),
                    self.inner.steps.clone(),
                )
            })
            .clone();
        buffer.start();
        buffer
    }

    #[must_use]
    pub fn get(&self, channel_id: &str) -> Option<EventBuffer> {
        self.inner.buffers.get(channel_id).map(|entry| entry.value().clone())
    }

    /// Stop and forget the buffer for `channel_id`.
    pub fn dispose(&self, channel_id: &str) -> Option<EventBuffer> {
        let (_, buffer) = self.inner.buffers.remove(channel_id)?;
        buffer.stop();
        Some(buffer)
    }

    /// Stop and forget every buffer.
    pub fn dispose_all(&self) {
        let channels = self.channels();
        for channel_id in channels {
            self.dispose(&channel_id);
        }
    }

    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.inner.buffers.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.buffers.is_empty()
    }

    /// Subscribe to steps from every buffer in the registry.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Step> {
        self.inner.steps.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}
