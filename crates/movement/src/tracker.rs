//! Bridges realtime channels to event buffers.

use std::sync::Arc;

use anyhow::Context as _;
use dashmap::DashMap;
use futures::future::join_all;
use realtime::{Channel, Error, Result, Socket};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::buffer::EventBuffer;
use crate::event::{LocationEvent, SubjectKind, TrackedSubject};
use crate::marker::Step;
use crate::registry::BufferRegistry;

/// Options for [`MovementTracker::track`].
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Channel to subscribe to instead of `"<kind>.<id>"`.
    pub channel_id: Option<String>,
}

impl TrackOptions {
    #[must_use]
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self { channel_id: Some(channel_id.into()) }
    }
}

/// Tracks any number of subjects, one channel subscription and one event
/// buffer per channel.
pub struct MovementTracker<S: Socket> {
    inner: Arc<Inner<S>>,
}

impl<S: Socket> Clone for MovementTracker<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<S> {
    socket: Arc<S>,
    registry: BufferRegistry,
    subscriptions: DashMap<String, Subscription>,
    locks: ChannelLocks,
}

struct Subscription {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl<S: Socket> MovementTracker<S> {
    #[must_use]
    pub fn new(socket: Arc<S>, registry: BufferRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                socket,
                registry,
                subscriptions: DashMap::new(),
                locks: ChannelLocks::default(),
            }),
        }
    }

    /// Start tracking `subject`.
    ///
    /// Subscribes to the subject's channel, waits for the subscription to be
    /// acknowledged, then forwards location events to the channel's buffer
    /// from a background task. Tracking a channel that is already tracked
    /// returns the existing buffer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` when the socket refuses the subscription.
    pub async fn track(
        &self, subject: &TrackedSubject, options: TrackOptions,
    ) -> Result<EventBuffer> {
        let channel_id = options.channel_id.unwrap_or_else(|| subject.channel_id());
        self.inner.locks.run(&channel_id, self.open(subject, &channel_id)).await
    }

    async fn open(&self, subject: &TrackedSubject, channel_id: &str) -> Result<EventBuffer> {
        if self.is_tracking(channel_id) {
            debug!(channel = %channel_id, subject = %subject.id, "reusing channel");
            return Ok(self.inner.registry.get_or_create(channel_id));
        }

        let channel = self
            .inner
            .socket
            .subscribe(channel_id)
            .await
            .with_context(|| format!("subscribing to {channel_id}"))
            .map_err(|err| Error::Channel(format!("{err:#}")))?;

        let buffer = self.inner.registry.get_or_create(channel_id);
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(listen(channel, subject.kind.clone(), buffer.clone(), stopped));
        self.inner.subscriptions.insert(channel_id.to_string(), Subscription { stop, task });

        info!(channel = %channel_id, subject = %subject.id, kind = %subject.kind, "tracking subject");
        Ok(buffer)
    }

    /// Track every subject concurrently. Failures are logged and skipped.
    pub async fn watch(&self, subjects: &[TrackedSubject]) -> Vec<EventBuffer> {
        let tracks = subjects.iter().map(|subject| async move {
            let result = self.track(subject, TrackOptions::default()).await;
            if let Err(err) = &result {
                warn!(subject = %subject.id, error = %err, "failed to track subject");
            }
            result.ok()
        });
        join_all(tracks).await.into_iter().flatten().collect()
    }

    /// Stop tracking one channel and dispose of its buffer.
    pub async fn untrack(&self, channel_id: &str) {
        self.inner
            .locks
            .run(channel_id, async {
                if let Some((_, subscription)) = self.inner.subscriptions.remove(channel_id) {
                    subscription.close(channel_id).await;
                }
                self.inner.registry.dispose(channel_id);
            })
            .await;
    }

    /// Unsubscribe every channel and dispose of every buffer. Safe to call
    /// repeatedly.
    pub async fn close_channels(&self) {
        let channels: Vec<String> =
            self.inner.subscriptions.iter().map(|entry| entry.key().clone()).collect();
        join_all(channels.iter().map(|channel_id| self.untrack(channel_id))).await;
        self.inner.registry.dispose_all();
    }

    #[must_use]
    pub fn is_tracking(&self, channel_id: &str) -> bool {
        self.inner.subscriptions.get(channel_id).is_some_and(|sub| !sub.task.is_finished())
    }

    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.inner.subscriptions.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn registry(&self) -> &BufferRegistry {
        &self.inner.registry
    }

    /// Subscribe to steps applied for any tracked subject.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Step> {
        self.inner.registry.subscribe()
    }
}

// Serialises subscription changes per channel. A channel's lock is dropped
// once nothing holds or awaits it.
#[derive(Default)]
struct ChannelLocks(DashMap<String, Arc<Mutex<()>>>);

impl ChannelLocks {
    async fn run<T>(&self, channel_id: &str, work: impl Future<Output = T>) -> T {
        let lock = Arc::clone(self.0.entry(channel_id.to_string()).or_default().value());
        let output = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.0.remove_if(channel_id, |_, lock| Arc::strong_count(lock) == 1);
        output
    }
}

impl Subscription {
    async fn close(self, channel_id: &str) {
        // the listener may already have exited on a closed channel
        let _ = self.stop.send(());
        if let Err(err) = self.task.await {
            warn!(channel = %channel_id, error = %err, "channel listener failed");
        }
    }
}

async fn listen(
    mut channel: Box<dyn Channel>, kind: SubjectKind, buffer: EventBuffer,
    mut stopped: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stopped => break,
            message = channel.next() => {
                let Some(message) = message else {
                    info!(channel = %channel.id(), "channel closed by socket");
                    return;
                };
                if !kind.is_location_event(&message.event) {
                    trace!(channel = %channel.id(), event = %message.event, "ignored message");
                    continue;
                }
                match LocationEvent::try_from(&message) {
                    Ok(event) => buffer.add(event),
                    Err(err) => {
                        warn!(channel = %channel.id(), event = %message.event, error = %err, "undecodable location event");
                    }
                }
            }
        }
    }

    match channel.unsubscribe().await {
        Ok(()) => debug!(channel = %channel.id(), "unsubscribed"),
        Err(err) => warn!(channel = %channel.id(), error = %err, "failed to unsubscribe"),
    }
}
