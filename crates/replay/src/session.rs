use std::sync::Arc;

use chrono::{DateTime, Utc};
use movement::{LatLng, LocationEvent, TrackedSubject};
use realtime::{Config, HttpRequest, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::history::{self, PositionQuery};

/// Event name given to replayed positions.
pub const REPLAY_EVENT: &str = "position.changed";

/// A recorded position as returned by the positions backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub id: String,
    pub subject_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub coordinates: Point,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// GeoJSON point, `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub coordinates: Vec<f64>,
}

impl PositionRecord {
    /// Convert to a location event carrying its replay sequence index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` when the recorded coordinate is unusable.
    pub fn to_event(&self, index: usize) -> Result<LocationEvent> {
        let location = LatLng::from_geojson(&self.coordinates.coordinates)?;
        Ok(LocationEvent {
            event: REPLAY_EVENT.to_string(),
            subject_id: self.subject_id.clone(),
            location,
            speed: self.speed,
            heading: self.heading,
            created_at: self.created_at,
            index: Some(index),
        })
    }
}

/// An ordered, immutable sequence of recorded positions for one subject.
#[derive(Debug, Clone)]
pub struct ReplaySession {
    subject: TrackedSubject,
    order_id: Option<String>,
    positions: Arc<[LocationEvent]>,
    position_ids: Arc<[String]>,
}

impl ReplaySession {
    /// Build a session from records in the order given. Records with unusable
    /// coordinates are dropped; indices are assigned after filtering.
    #[must_use]
    pub fn new(subject: TrackedSubject, records: &[PositionRecord]) -> Self {
        let mut positions = Vec::with_capacity(records.len());
        let mut position_ids = Vec::with_capacity(records.len());

        for record in records {
            match record.to_event(positions.len()) {
                Ok(event) => {
                    positions.push(event);
                    position_ids.push(record.id.clone());
                }
                Err(err) => {
                    warn!(subject = %subject.id, position = %record.id, error = %err, "dropped position");
                }
            }
        }

        Self {
            subject,
            order_id: None,
            positions: positions.into(),
            position_ids: position_ids.into(),
        }
    }

    #[must_use]
    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Fetch the subject's recorded positions and build a session from them,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the positions backend cannot be queried.
    pub async fn load<P>(provider: &P, subject: TrackedSubject, query: &PositionQuery) -> Result<Self>
    where
        P: Config + HttpRequest,
    {
        let mut records = history::positions(provider, query).await?;
        records.sort_by_key(|record| record.created_at);
        debug!(subject = %subject.id, positions = records.len(), "loaded replay session");

        let session = Self::new(subject, &records);
        Ok(match &query.order_id {
            Some(order_id) => session.with_order(order_id.clone()),
            None => session,
        })
    }

    #[must_use]
    pub const fn subject(&self) -> &TrackedSubject {
        &self.subject
    }

    #[must_use]
    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    #[must_use]
    pub fn positions(&self) -> &[LocationEvent] {
        &self.positions
    }

    /// Ids of the positions in the session, for metrics queries.
    #[must_use]
    pub fn position_ids(&self) -> &[String] {
        &self.position_ids
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LocationEvent> {
        self.positions.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
