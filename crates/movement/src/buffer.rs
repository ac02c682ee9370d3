//! Per-subject event buffering.
//!
//! Location events arrive at whatever rate and order the socket delivers
//! them. The buffer queues them and, on a timer, drains the queue as a
//! sequence of paced marker movements so the marker slides through each
//! position in timestamp order instead of jumping.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use realtime::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::event::LocationEvent;
use crate::marker::{self, Animation, MarkerResolver, Step};

#[derive(Clone)]
pub struct EventBuffer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("channel_id", &self.inner.channel_id)
            .finish_non_exhaustive()
    }
}

struct Inner {
    channel_id: String,
    config: Config,
    resolver: Arc<dyn MarkerResolver>,
    queue: Mutex<Vec<LocationEvent>>,
    processing: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    steps: broadcast::Sender<Step>,
}

impl EventBuffer {
    /// Create a buffer with its own step stream.
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>, resolver: Arc<dyn MarkerResolver>, config: Config,
    ) -> Self {
        let (steps, _) = broadcast::channel(config.step_capacity.max(1));
        Self::with_sender(channel_id, resolver, config, steps)
    }

    /// Create a buffer publishing steps to an existing stream.
    #[must_use]
    pub fn with_sender(
        channel_id: impl Into<String>, resolver: Arc<dyn MarkerResolver>, config: Config,
        steps: broadcast::Sender<Step>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel_id: channel_id.into(),
                config,
                resolver,
                queue: Mutex::new(Vec::new()),
                processing: AtomicBool::new(false),
                timer: Mutex::new(None),
                steps,
            }),
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.inner.channel_id
    }

    /// Queue an event for the next drain.
    pub fn add(&self, event: LocationEvent) {
        debug!(channel = %self.inner.channel_id, subject = %event.subject_id, "queued location event");
        self.queue().push(event);
    }

    /// Number of queued events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.inner.timer).as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Subscribe to step notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Step> {
        self.inner.steps.subscribe()
    }

    /// Start the drain timer. Calling `start` on a running buffer does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut timer = lock(&self.inner.timer);
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let interval = self.inner.config.drain_interval;
        let weak = Arc::downgrade(&self.inner);
        *timer = Some(tokio::spawn(run_timer(weak, interval)));
        info!(channel = %self.inner.channel_id, interval_ms = interval.as_millis(), "buffer started");
    }

    /// Stop the drain timer. A drain in progress is abandoned after its
    /// current animation; queued events stay queued.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
            info!(channel = %self.inner.channel_id, "buffer stopped");
        }
    }

    /// Drain the queue now, returning the number of events applied.
    ///
    /// Returns immediately with 0 when another drain is in progress; events
    /// added meanwhile are picked up by the next drain.
    pub async fn drain(&self) -> usize {
        let Some(_guard) = ProcessingGuard::acquire(&self.inner.processing) else {
            debug!(channel = %self.inner.channel_id, "drain already in progress");
            return 0;
        };

        let mut batch = mem::take(&mut *self.queue());
        if batch.is_empty() {
            return 0;
        }
        batch.sort_by_key(|event| event.created_at);
        debug!(channel = %self.inner.channel_id, events = batch.len(), "draining buffer");

        let mut applied = 0;
        for event in batch {
            match self.apply(event) {
                Ok(step) => {
                    let pause = step.animation.duration + self.inner.config.settle;
                    // no receivers is fine
                    let _ = self.inner.steps.send(step);
                    applied += 1;
                    time::sleep(pause).await;
                }
                Err(err) => {
                    warn!(channel = %self.inner.channel_id, error = %err, "skipped location event");
                }
            }
        }
        applied
    }

    fn apply(&self, event: LocationEvent) -> Result<Step, Error> {
        event.location.validate()?;
        let Some(marker) = self.inner.resolver.marker(&event.subject_id) else {
            return Err(Error::MarkerUnavailable(event.subject_id));
        };

        let distance = marker.position().distance_to(&event.location);
        let mps = event.mps();
        let duration = self.inner.config.step_duration(distance, mps);
        marker::apply(marker.as_ref(), event.location, event.heading(), duration);

        debug!(
            subject = %event.subject_id,
            distance_m = distance,
            duration_ms = duration.as_millis(),
            "moved marker"
        );

        let animation = Animation { next_lat_lng: event.location, duration, mps };
        Ok(Step { event, animation })
    }

    fn queue(&self) -> MutexGuard<'_, Vec<LocationEvent>> {
        lock(&self.inner.queue)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

async fn run_timer(inner: Weak<Inner>, interval: std::time::Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let buffer = EventBuffer { inner };
        if buffer.pending() > 0 && !buffer.is_processing() {
            buffer.drain().await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
