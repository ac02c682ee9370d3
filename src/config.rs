use std::env;

use anyhow::{Context, Result};

/// Settings for a console, read from the environment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub movement: movement::Config,
    pub replay: replay::Config,
    pub socket: SocketConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Messages retained per channel for slow subscribers.
    pub channel_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            movement: movement::Config::from_env(),
            replay: replay::Config::from_env(),
            socket: SocketConfig { channel_capacity: socket_channel_capacity() },
        }
    }
}

fn socket_channel_capacity() -> usize {
    let default = SocketConfig::default().channel_capacity;
    env::var("SOCKET_CHANNEL_CAPACITY").ok().and_then(|value| value.parse().ok()).unwrap_or_else(
        || {
            tracing::trace!("SOCKET_CHANNEL_CAPACITY not set, using default: {default}");
            default
        },
    )
}

/// Provider settings (backend URLs and the like) read from environment
/// variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettings;

impl realtime::Config for EnvSettings {
    async fn get(&self, key: &str) -> Result<String> {
        env::var(key).with_context(|| format!("{key} not set"))
    }
}
