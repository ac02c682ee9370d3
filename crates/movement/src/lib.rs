//! Live movement tracking.
//!
//! Location updates for tracked subjects arrive on realtime channels. The
//! [`MovementTracker`] subscribes to a channel per subject and forwards the
//! updates into that channel's [`EventBuffer`], which replays them onto the
//! subject's map marker in timestamp order at a pace proportional to the
//! reported speed.

pub mod buffer;
pub mod config;
pub mod event;
pub mod geo;
pub mod marker;
pub mod registry;
pub mod tracker;

pub use buffer::EventBuffer;
pub use config::Config;
pub use event::{LocationEvent, SubjectKind, TrackedSubject};
pub use geo::LatLng;
pub use marker::{Animation, MarkerResolver, MarkerTable, Movable, Step};
pub use registry::BufferRegistry;
pub use tracker::{MovementTracker, TrackOptions};
