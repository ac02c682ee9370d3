//! # Fleetops
//!
//! Movement pipeline of a fleet operations console. Live location updates
//! arrive on realtime channels and are replayed onto map markers in order,
//! paced by the reported speed; recorded positions can be replayed and
//! scrubbed through the same marker.
//!
//! The [`Console`] ties the two together for a set of subjects, and
//! [`LocalSocket`] provides an in-process channel hub for simulated feeds.

mod config;
mod console;
mod provider;

pub use movement;
pub use realtime;
pub use replay;

pub use crate::config::{Config, EnvSettings, SocketConfig};
pub use crate::console::Console;
pub use crate::provider::LocalSocket;
