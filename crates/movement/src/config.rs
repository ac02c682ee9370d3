use std::env;
use std::time::Duration;

/// Pacing settings for live tracking.
///
/// The step bounds are heuristics kept for behavioural compatibility with the
/// console; they are tunable rather than derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How often a buffer checks for queued events.
    pub drain_interval: Duration,
    /// Shortest animation a single step may use.
    pub min_step: Duration,
    /// Longest animation a single step may use.
    pub max_step: Duration,
    /// Animation used when an event carries no usable speed.
    pub fallback_step: Duration,
    /// Extra pause after each animation before the next event is applied.
    pub settle: Duration,
    /// Capacity of the step notification stream.
    pub step_capacity: usize,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            drain_interval: env_millis("DRAIN_INTERVAL_MS", defaults.drain_interval),
            min_step: env_millis("MIN_STEP_MS", defaults.min_step),
            max_step: env_millis("MAX_STEP_MS", defaults.max_step),
            fallback_step: env_millis("FALLBACK_STEP_MS", defaults.fallback_step),
            settle: env_millis("SETTLE_MS", defaults.settle),
            step_capacity: env_usize("STEP_CHANNEL_CAPACITY", defaults.step_capacity),
        }
    }

    /// Animation duration for moving `distance_m` metres at `mps`.
    ///
    /// Falls back to `fallback_step` when the speed is unknown, then clamps to
    /// `[min_step, max_step]`.
    #[must_use]
    pub fn step_duration(&self, distance_m: f64, mps: Option<f64>) -> Duration {
        let raw = match mps {
            Some(speed) if speed.is_finite() && speed > 0.0 && distance_m.is_finite() => {
                Duration::try_from_secs_f64(distance_m.max(0.0) / speed)
                    .unwrap_or(self.max_step)
            }
            _ => self.fallback_step,
        };
        raw.clamp(self.min_step, self.max_step.max(self.min_step))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(3_000),
            min_step: Duration::from_millis(100),
            max_step: Duration::from_millis(500),
            fallback_step: Duration::from_millis(500),
            settle: Duration::from_millis(50),
            step_capacity: 1_024,
        }
    }
}

pub(crate) fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|value| value.parse::<usize>().ok()).unwrap_or(default)
}
