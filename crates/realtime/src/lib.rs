//! # Realtime Core
//!
//! Core modules shared by the tracking and replay crates: the domain error
//! type and the provider traits through which external collaborators (HTTP
//! backends, configuration, pub/sub sockets) are reached.

mod error;
mod provider;

pub use crate::error::*;
pub use crate::provider::*;
