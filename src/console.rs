//! Console facade over live tracking and replay.
//!
//! A subject's marker is driven either by its live channel or by a replay,
//! never both. Starting one stops the other.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use movement::{
    BufferRegistry, EventBuffer, MarkerResolver, MarkerTable, Movable, MovementTracker, Step,
    TrackOptions, TrackedSubject,
};
use realtime::{Error, HttpRequest, Result, Socket};
use replay::{PlaybackController, PositionQuery, ReplaySession};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;

pub struct Console<S: Socket> {
    inner: Arc<Inner<S>>,
}

impl<S: Socket> Clone for Console<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<S: Socket> {
    config: Config,
    tracker: MovementTracker<S>,
    markers: MarkerTable,
    subjects: DashMap<String, TrackedSubject>,
    // subject id -> live channel id
    live: DashMap<String, String>,
    replays: DashMap<String, PlaybackController>,
    follower: OnceLock<JoinHandle<()>>,
}

impl<S: Socket> Console<S> {
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(socket: Arc<S>, config: Config) -> Self {
        let markers = MarkerTable::new();
        let resolver: Arc<dyn MarkerResolver> = Arc::new(markers.clone());
        let registry = BufferRegistry::new(resolver, config.movement.clone());
        let steps = registry.subscribe();

        let inner = Arc::new(Inner {
            config,
            tracker: MovementTracker::new(socket, registry),
            markers,
            subjects: DashMap::new(),
            live: DashMap::new(),
            replays: DashMap::new(),
            follower: OnceLock::new(),
        });
        let _ = inner.follower.set(tokio::spawn(follow(Arc::downgrade(&inner), steps)));

        Self { inner }
    }

    /// Register the marker rendered for `subject_id`.
    pub fn add_marker(&self, subject_id: impl Into<String>, marker: Arc<dyn Movable>) {
        self.inner.markers.insert(subject_id, marker);
    }

    pub fn remove_marker(&self, subject_id: &str) -> Option<Arc<dyn Movable>> {
        self.inner.markers.remove(subject_id)
    }

    /// Start live tracking, ending any replay of the subject.
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` when the socket refuses the subscription.
    pub async fn track(
        &self, subject: &TrackedSubject, options: TrackOptions,
    ) -> Result<EventBuffer> {
        self.end_replay(&subject.id);

        let channel_id = options.channel_id.clone().unwrap_or_else(|| subject.channel_id());
        let previous = self.inner.live.get(&subject.id).map(|entry| entry.value().clone());
        if previous.is_some_and(|previous| previous != channel_id) {
            self.leave_live(&subject.id).await;
        }

        let buffer = self.inner.tracker.track(subject, options).await?;

        self.inner.subjects.entry(subject.id.clone()).or_insert_with(|| subject.clone());
        self.inner.live.insert(subject.id.clone(), channel_id);
        Ok(buffer)
    }

    /// Track every subject on its default channel. Failures are logged and
    /// skipped.
    pub async fn watch(&self, subjects: &[TrackedSubject]) -> Vec<EventBuffer> {
        let mut buffers = Vec::with_capacity(subjects.len());
        for subject in subjects {
            match self.track(subject, TrackOptions::default()).await {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => warn!(subject = %subject.id, error = %err, "failed to track subject"),
            }
        }
        buffers
    }

    /// Stop live tracking of a subject and forget its last known state.
    pub async fn untrack(&self, subject_id: &str) {
        self.leave_live(subject_id).await;
        self.inner.subjects.remove(subject_id);
    }

    // Release the subject's live channel, keeping its last known state.
    async fn leave_live(&self, subject_id: &str) {
        if let Some((_, channel_id)) = self.inner.live.remove(subject_id) {
            self.inner.tracker.untrack(&channel_id).await;
            debug!(subject = %subject_id, channel = %channel_id, "live tracking stopped");
        }
    }

    #[must_use]
    pub fn is_live(&self, subject_id: &str) -> bool {
        self.inner
            .live
            .get(subject_id)
            .is_some_and(|channel| self.inner.tracker.is_tracking(channel.value()))
    }

    /// Replay `session` on the subject's marker, suspending live tracking of
    /// the subject. The returned controller is loaded but not playing.
    ///
    /// # Errors
    ///
    /// Returns `MarkerUnavailable` when no marker is registered for the
    /// subject and `MissingInput` when the session has no positions.
    pub async fn replay(
        &self, session: ReplaySession, speed: Option<f64>,
    ) -> Result<PlaybackController> {
        let subject_id = session.subject().id.clone();
        let marker = self
            .inner
            .markers
            .marker(&subject_id)
            .ok_or_else(|| Error::MarkerUnavailable(subject_id.clone()))?;
        if session.is_empty() {
            return Err(Error::MissingInput(format!("no positions to replay for {subject_id}")));
        }

        self.leave_live(&subject_id).await;

        let controller = self
            .inner
            .replays
            .entry(subject_id.clone())
            .or_insert_with(|| PlaybackController::new(self.inner.config.replay.clone()))
            .clone();
        if !controller.load(session, speed, Some(marker)) {
            return Err(Error::MissingInput(format!("no positions to replay for {subject_id}")));
        }

        info!(subject = %subject_id, "replay ready");
        Ok(controller)
    }

    /// Fetch the subject's recorded positions and replay them.
    ///
    /// # Errors
    ///
    /// Returns an error when the positions cannot be fetched, or as for
    /// [`Self::replay`].
    pub async fn load_replay<P>(
        &self, provider: &P, subject: TrackedSubject, query: &PositionQuery, speed: Option<f64>,
    ) -> Result<PlaybackController>
    where
        P: realtime::Config + HttpRequest,
    {
        let session = ReplaySession::load(provider, subject, query).await?;
        self.replay(session, speed).await
    }

    /// Stop and discard the subject's replay, if any. Live tracking is not
    /// resumed.
    pub fn end_replay(&self, subject_id: &str) {
        if let Some((_, controller)) = self.inner.replays.remove(subject_id) {
            controller.stop();
            debug!(subject = %subject_id, "replay ended");
        }
    }

    #[must_use]
    pub fn playback(&self, subject_id: &str) -> Option<PlaybackController> {
        self.inner.replays.get(subject_id).map(|entry| entry.value().clone())
    }

    /// Last known state of a live-tracked subject.
    #[must_use]
    pub fn subject(&self, subject_id: &str) -> Option<TrackedSubject> {
        self.inner.subjects.get(subject_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn subjects(&self) -> Vec<TrackedSubject> {
        self.inner.subjects.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Steps applied by live tracking.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Step> {
        self.inner.tracker.subscribe()
    }

    #[must_use]
    pub fn tracker(&self) -> &MovementTracker<S> {
        &self.inner.tracker
    }

    /// Close every channel, detach every subject and end every replay.
    pub async fn shutdown(&self) {
        self.inner.tracker.close_channels().await;
        self.inner.live.clear();
        self.inner.subjects.clear();

        let subjects: Vec<String> =
            self.inner.replays.iter().map(|entry| entry.key().clone()).collect();
        for subject_id in subjects {
            self.end_replay(&subject_id);
        }
        info!("console shut down");
    }
}

impl<S: Socket> Drop for Inner<S> {
    fn drop(&mut self) {
        if let Some(follower) = self.follower.get() {
            follower.abort();
        }
    }
}

// Keep subject state current from live steps.
async fn follow<S: Socket>(inner: Weak<Inner<S>>, mut steps: broadcast::Receiver<Step>) {
    loop {
        let step = match steps.recv().await {
            Ok(step) => step,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "subject updates lagged");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if let Some(mut subject) = inner.subjects.get_mut(&step.event.subject_id) {
            subject.apply(&step.event);
        }
    }
}
