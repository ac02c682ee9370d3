//! Marker capability exposed by the rendering layer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::event::LocationEvent;
use crate::geo::LatLng;

/// A map marker that can be repositioned.
///
/// Markers belong to the rendering layer. Implementations use interior
/// mutability because the pipeline only ever holds shared references.
pub trait Movable: Send + Sync {
    /// Current rendered position.
    fn position(&self) -> LatLng;

    /// Move instantly.
    fn set_position(&self, to: LatLng);

    /// Slide to `to` over `duration`. Markers without animation support move
    /// instantly.
    fn animate_to(&self, to: LatLng, duration: Duration) {
        let _ = duration;
        self.set_position(to);
    }

    /// Rotate to `degrees`. Ignored by markers that cannot rotate.
    fn set_heading(&self, degrees: f64) {
        let _ = degrees;
    }
}

/// Looks up the marker currently rendered for a subject.
pub trait MarkerResolver: Send + Sync {
    fn marker(&self, subject_id: &str) -> Option<Arc<dyn Movable>>;
}

/// Resolver backed by an explicit subject id -> marker table.
#[derive(Clone, Default)]
pub struct MarkerTable {
    markers: Arc<DashMap<String, Arc<dyn Movable>>>,
}

impl MarkerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subject_id: impl Into<String>, marker: Arc<dyn Movable>) {
        self.markers.insert(subject_id.into(), marker);
    }

    pub fn remove(&self, subject_id: &str) -> Option<Arc<dyn Movable>> {
        self.markers.remove(subject_id).map(|(_, marker)| marker)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

impl MarkerResolver for MarkerTable {
    fn marker(&self, subject_id: &str) -> Option<Arc<dyn Movable>> {
        self.markers.get(subject_id).map(|entry| Arc::clone(entry.value()))
    }
}

/// Parameters of one marker movement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Animation {
    pub next_lat_lng: LatLng,
    pub duration: Duration,
    /// Speed used for pacing, when one was known.
    pub mps: Option<f64>,
}

/// Notification published after a location event has been applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub event: LocationEvent,
    pub animation: Animation,
}

/// Moves `marker` to `to`, rotating first when `heading` is known.
pub fn apply(marker: &dyn Movable, to: LatLng, heading: Option<f64>, duration: Duration) {
    if let Some(degrees) = heading {
        marker.set_heading(degrees);
    }
    marker.animate_to(to, duration);
}
