use std::env;

/// Replay settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Speed multiplier used when a session does not ask for one.
    pub default_speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    /// Step pacing bounds, shared with live tracking.
    pub pacing: movement::Config,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let min_speed = env_speed("REPLAY_MIN_SPEED").unwrap_or(defaults.min_speed);
        let max_speed =
            env_speed("REPLAY_MAX_SPEED").unwrap_or(defaults.max_speed).max(min_speed);
        Self {
            default_speed: env_speed("REPLAY_DEFAULT_SPEED").unwrap_or(defaults.default_speed),
            min_speed,
            max_speed,
            pacing: movement::Config::from_env(),
        }
    }

    /// Clamp a requested multiplier to the configured range. Returns `None`
    /// for non-finite or non-positive values.
    #[must_use]
    pub fn speed(&self, multiplier: f64) -> Option<f64> {
        let (min, max) = self.bounds();
        (multiplier.is_finite() && multiplier > 0.0).then(|| multiplier.clamp(min, max))
    }

    /// The default multiplier, clamped to the range, or 1.0 when unusable.
    #[must_use]
    pub fn initial_speed(&self) -> f64 {
        self.speed(self.default_speed).unwrap_or(1.0)
    }

    // Bounds usable for clamping whatever the fields hold.
    fn bounds(&self) -> (f64, f64) {
        let defaults = Self::default();
        let min = Some(self.min_speed).filter(|v| is_speed(*v)).unwrap_or(defaults.min_speed);
        let max = Some(self.max_speed).filter(|v| is_speed(*v)).unwrap_or(defaults.max_speed);
        (min, max.max(min))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_speed: 1.0,
            min_speed: 0.1,
            max_speed: 16.0,
            pacing: movement::Config::default(),
        }
    }
}

fn is_speed(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn env_speed(key: &str) -> Option<f64> {
    let value = env::var(key).ok()?;
    let speed = value.trim().parse::<f64>().ok().filter(|v| is_speed(*v));
    if speed.is_none() {
        tracing::warn!(key, value = %value, "ignoring invalid replay speed");
    }
    speed
}
