//! In-process realtime socket.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use realtime::{Channel, ChannelMessage, Socket};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::config::SocketConfig;

type Hub = DashMap<String, broadcast::Sender<ChannelMessage>>;

/// A [`Socket`] whose channels live in process.
///
/// Messages published to a channel reach every current subscriber of that
/// channel. Used to feed simulated positions and in tests.
#[derive(Clone)]
pub struct LocalSocket {
    hub: Arc<Hub>,
    capacity: usize,
}

impl LocalSocket {
    #[must_use]
    pub fn new(config: SocketConfig) -> Self {
        Self { hub: Arc::new(DashMap::new()), capacity: config.channel_capacity.max(1) }
    }

    /// Publish `message` on `channel_id`, returning the number of subscribers
    /// it was delivered to.
    pub fn publish(&self, channel_id: &str, message: ChannelMessage) -> usize {
        let Some(sender) = self.hub.get(channel_id) else {
            debug!(channel = %channel_id, event = %message.event, "no subscribers");
            return 0;
        };
        sender.send(message).unwrap_or_default()
    }

    /// Close `channel_id` for every subscriber.
    pub fn close(&self, channel_id: &str) {
        if self.hub.remove(channel_id).is_some() {
            debug!(channel = %channel_id, "channel closed");
        }
    }

    #[must_use]
    pub fn subscribers(&self, channel_id: &str) -> usize {
        self.hub.get(channel_id).map_or(0, |sender| sender.receiver_count())
    }
}

impl Default for LocalSocket {
    fn default() -> Self {
        Self::new(SocketConfig::default())
    }
}

impl Socket for LocalSocket {
    async fn subscribe(&self, channel_id: &str) -> Result<Box<dyn Channel>> {
        let rx = self
            .hub
            .entry(channel_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(channel = %channel_id, "subscribed");
        Ok(Box::new(LocalChannel {
            id: channel_id.to_string(),
            rx: Some(rx),
            hub: Arc::clone(&self.hub),
        }))
    }
}

struct LocalChannel {
    id: String,
    rx: Option<broadcast::Receiver<ChannelMessage>>,
    hub: Arc<Hub>,
}

#[async_trait]
impl Channel for LocalChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn next(&mut self) -> Option<ChannelMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.id, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if self.rx.take().is_some() {
            // forget the channel once its last subscriber leaves
            self.hub.remove_if(&self.id, |_, sender| sender.receiver_count() == 0);
        }
        Ok(())
    }
}
