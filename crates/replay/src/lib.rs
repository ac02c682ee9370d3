//! Position replay.
//!
//! A [`ReplaySession`] is an ordered, immutable sequence of recorded positions
//! for one subject, fetched from the positions backend through [`history`].
//! The [`PlaybackController`] plays it back onto a marker with the same
//! pacing as live tracking, and can be paused, stepped and scrubbed.

pub mod config;
pub mod controller;
pub mod history;
pub mod session;

pub use config::Config;
pub use controller::{Phase, PlaybackController, PlaybackEvent, PlaybackOptions, PlaybackStatus};
pub use history::{Metrics, PositionQuery};
pub use session::{PositionRecord, ReplaySession};
