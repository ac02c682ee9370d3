//! Scrubbable playback of a recorded position sequence.
//!
//! Phases move `Idle -> Playing <-> Paused -> Completed`, and any phase
//! returns to `Idle` on stop. `index` counts the positions already applied,
//! so it always lies in `[0, len]` and the marker shows position `index - 1`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use movement::{Animation, LatLng, LocationEvent, Movable, Step, TrackedSubject};
use serde::Serialize;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::session::{PositionRecord, ReplaySession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Playing,
    Paused,
    Completed,
}

/// Notifications published by a controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Step(Step),
    Complete,
    /// A request was ignored; the message is suitable for display.
    Warning { message: String },
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub phase: Phase,
    pub current_index: usize,
    pub total_positions: usize,
    pub progress: u8,
    pub speed: f64,
}

/// Inputs to [`PlaybackController::initialize`].
#[derive(Clone, Default)]
pub struct PlaybackOptions {
    pub subject: Option<TrackedSubject>,
    pub positions: Vec<PositionRecord>,
    pub speed: Option<f64>,
    pub marker: Option<Arc<dyn Movable>>,
}

impl PlaybackOptions {
    #[must_use]
    pub fn new(subject: TrackedSubject, positions: Vec<PositionRecord>) -> Self {
        Self { subject: Some(subject), positions, ..Self::default() }
    }

    #[must_use]
    pub const fn speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    #[must_use]
    pub fn marker(mut self, marker: Arc<dyn Movable>) -> Self {
        self.marker = Some(marker);
        self
    }
}

#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    state: Mutex<State>,
    events: broadcast::Sender<PlaybackEvent>,
    // wakes a run task sleeping between steps
    speed_changed: Arc<Notify>,
}

struct State {
    session: Option<ReplaySession>,
    marker: Option<Arc<dyn Movable>>,
    phase: Phase,
    index: usize,
    speed: f64,
    // bumped whenever a running playback task must stop
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl PlaybackController {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (events, _) = broadcast::channel(config.pacing.step_capacity.max(1));
        let speed = config.initial_speed();
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    session: None,
                    marker: None,
                    phase: Phase::Idle,
                    index: 0,
                    speed,
                    generation: 0,
                    task: None,
                }),
                events,
                speed_changed: Arc::new(Notify::new()),
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    /// Load a position sequence, resetting any previous playback.
    ///
    /// Returns `false`, publishing a warning and leaving the controller
    /// untouched, when there is no subject or no usable position.
    pub fn initialize(&self, options: PlaybackOptions) -> bool {
        let Some(subject) = options.subject else {
            self.warn("Select a driver or vehicle to replay");
            return false;
        };
        let session = ReplaySession::new(subject, &options.positions);
        self.load(session, options.speed, options.marker)
    }

    /// Load an already built session. See [`Self::initialize`].
    pub fn load(
        &self, session: ReplaySession, speed: Option<f64>, marker: Option<Arc<dyn Movable>>,
    ) -> bool {
        if session.is_empty() {
            self.warn(&format!("No positions to replay for {}", session.subject().id));
            return false;
        }

        let speed = speed.and_then(|s| self.inner.config.speed(s));
        let mut state = self.state();
        halt(&mut state);
        info!(subject = %session.subject().id, positions = session.len(), "replay loaded");
        state.session = Some(session);
        state.marker = marker;
        state.index = 0;
        state.phase = Phase::Idle;
        state.speed = speed.unwrap_or_else(|| self.inner.config.initial_speed());
        true
    }

    /// Start from the beginning when idle or completed, or resume when paused.
    ///
    /// Must be called from within a tokio runtime.
    pub fn play(&self) {
        let mut state = self.state();
        if state.session.is_none() {
            drop(state);
            self.warn("Nothing loaded to replay");
            return;
        }

        match state.phase {
            Phase::Playing => return,
            Phase::Idle | Phase::Completed => state.index = 0,
            Phase::Paused => {}
        }

        halt(&mut state);
        state.phase = Phase::Playing;
        let generation = state.generation;
        let woken = Arc::clone(&self.inner.speed_changed);
        state.task = Some(tokio::spawn(run(Arc::downgrade(&self.inner), woken, generation)));
        debug!(index = state.index, "replay playing");
    }

    /// Freeze at the current index. Ignored unless playing.
    pub fn pause(&self) {
        let mut state = self.state();
        if state.phase != Phase::Playing {
            return;
        }
        halt(&mut state);
        state.phase = Phase::Paused;
        debug!(index = state.index, "replay paused");
    }

    /// Return to idle at index 0. Safe in any phase.
    pub fn stop(&self) {
        let mut state = self.state();
        if state.phase == Phase::Idle && state.index == 0 {
            return;
        }
        halt(&mut state);
        state.phase = Phase::Idle;
        state.index = 0;
        debug!("replay stopped");
    }

    /// Alias of [`Self::stop`].
    pub fn reset(&self) {
        self.stop();
    }

    /// Apply the next `n` positions immediately, pausing first if playing.
    pub fn step_forward(&self, n: usize) {
        let steps = {
            let mut state = self.state();
            let Some(len) = state.session.as_ref().map(ReplaySession::len) else {
                return;
            };
            hold(&mut state);
            let target = state.index.saturating_add(n).min(len);
            let mut steps = Vec::with_capacity(target - state.index);
            while state.index < target {
                let i = state.index;
                if let Some(step) = self.apply(&state, i) {
                    steps.push(step);
                }
                state.index += 1;
            }
            steps
        };
        self.publish(steps);
    }

    /// Move back `n` positions immediately, pausing first if playing.
    pub fn step_backward(&self, n: usize) {
        let steps = {
            let mut state = self.state();
            if state.session.is_none() {
                return;
            }
            hold(&mut state);
            let target = state.index.saturating_sub(n);
            let mut steps = Vec::with_capacity(state.index - target);
            while state.index > target {
                state.index -= 1;
                let shown = state.index.saturating_sub(1);
                if let Some(step) = self.apply(&state, shown) {
                    steps.push(step);
                }
            }
            steps
        };
        self.publish(steps);
    }

    /// Jump to `index` (clamped), pausing first if playing.
    pub fn seek(&self, index: usize) {
        let steps = {
            let mut state = self.state();
            let Some(len) = state.session.as_ref().map(ReplaySession::len) else {
                return;
            };
            hold(&mut state);
            state.index = index.min(len);
            self.apply(&state, state.index.saturating_sub(1)).into_iter().collect::<Vec<_>>()
        };
        self.publish(steps);
    }

    /// Change the pacing divisor. The remaining pause of a step in progress
    /// is rescaled to the new speed.
    pub fn set_speed(&self, multiplier: f64) {
        let Some(speed) = self.inner.config.speed(multiplier) else {
            self.warn(&format!("Invalid replay speed {multiplier}"));
            return;
        };
        self.state().speed = speed;
        self.inner.speed_changed.notify_waiters();
        debug!(speed, "replay speed changed");
    }

    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        let state = self.state();
        let total = state.session.as_ref().map_or(0, ReplaySession::len);
        PlaybackStatus {
            phase: state.phase,
            current_index: state.index,
            total_positions: total,
            progress: progress(state.index, total),
            speed: state.speed,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.state().index
    }

    #[must_use]
    pub fn session(&self) -> Option<ReplaySession> {
        self.state().session.clone()
    }

    /// Move the marker to position `i`, returning the step to publish.
    fn apply(&self, state: &State, i: usize) -> Option<Step> {
        let session = state.session.as_ref()?;
        let event = session.get(i)?.clone();
        let from = state
            .marker
            .as_ref()
            .map(|marker| marker.position())
            .or_else(|| i.checked_sub(1).and_then(|prev| session.get(prev)).map(|e| e.location));
        let duration = self.paced(from, &event, state.speed);

        if let Some(marker) = &state.marker {
            movement::marker::apply(marker.as_ref(), event.location, event.heading(), duration);
        }

        let animation = Animation { next_lat_lng: event.location, duration, mps: event.mps() };
        Some(Step { event, animation })
    }

    fn paced(&self, from: Option<LatLng>, to: &LocationEvent, speed: f64) -> Duration {
        let pacing = &self.inner.config.pacing;
        let distance = from.map_or(f64::NAN, |from| from.distance_to(&to.location));
        pacing.step_duration(distance, to.mps()).div_f64(speed)
    }

    fn publish(&self, steps: Vec<Step>) {
        for step in steps {
            let _ = self.inner.events.send(PlaybackEvent::Step(step));
        }
    }

    fn warn(&self, message: &str) {
        warn!(message, "replay request ignored");
        let _ = self.inner.events.send(PlaybackEvent::Warning { message: message.to_string() });
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

/// Percentage of positions applied, 0 for an empty sequence.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = index.min(total) as f64 / total as f64;
    (ratio * 100.0).round() as u8
}

// Stop any running playback task.
fn halt(state: &mut State) {
    state.generation = state.generation.wrapping_add(1);
    if let Some(task) = state.task.take() {
        task.abort();
    }
}

// Manual steps leave idle and completed sessions paused so a later `play`
// resumes from the stepped position.
fn hold(state: &mut State) {
    halt(state);
    state.phase = Phase::Paused;
}

async fn run(weak: Weak<Inner>, speed_changed: Arc<Notify>, generation: u64) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let controller = PlaybackController { inner };

        let pause = {
            let mut state = controller.state();
            if state.generation != generation || state.phase != Phase::Playing {
                return;
            }
            let len = state.session.as_ref().map_or(0, ReplaySession::len);
            if state.index >= len {
                state.phase = Phase::Completed;
                state.task = None;
                drop(state);
                info!("replay complete");
                let _ = controller.inner.events.send(PlaybackEvent::Complete);
                return;
            }

            let i = state.index;
            let speed = state.speed;
            let step = controller.apply(&state, i);
            state.index += 1;
            drop(state);

            step.map(|step| {
                let pause = step.animation.duration + controller.inner.config.pacing.settle;
                controller.publish(vec![step]);
                (pause, speed)
            })
        };

        drop(controller);
        if let Some((pause, speed)) = pause {
            settle(&weak, &speed_changed, pause, speed).await;
        }
    }
}

// Sleep for `pause`, stretching or shrinking what is left of it whenever the
// speed changes.
async fn settle(inner: &Weak<Inner>, speed_changed: &Notify, pause: Duration, mut speed: f64) {
    let mut deadline = time::Instant::now() + pause;
    loop {
        tokio::select! {
            () = time::sleep_until(deadline) => return,
            () = speed_changed.notified() => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let current = PlaybackController { inner }.state().speed;
                let now = time::Instant::now();
                let remaining = deadline.saturating_duration_since(now);
                deadline = now + remaining.mul_f64(speed / current);
                speed = current;
            }
        }
    }
}
