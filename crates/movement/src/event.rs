use std::fmt;

use chrono::{DateTime, Utc};
use realtime::{ChannelMessage, Error};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::geo::{LatLng, known_heading};

/// Kinds of event that move a marker, regardless of subject type.
const POSITION_KINDS: [&str; 2] = ["position.changed", "position.simulated"];

/// Suffixes recognised on `"<kind>.<suffix>"` events.
const SUBJECT_SUFFIXES: [&str; 2] = ["location_changed", "simulated_location_changed"];

/// What sort of resource a tracked subject is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Driver,
    Vehicle,
    /// A position replay stream.
    Position,
    #[serde(untagged)]
    Other(String),
}

impl SubjectKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Driver => "driver",
            Self::Vehicle => "vehicle",
            Self::Position => "position",
            Self::Other(kind) => kind,
        }
    }

    /// Whether `event` is a location update for subjects of this kind.
    #[must_use]
    pub fn is_location_event(&self, event: &str) -> bool {
        if POSITION_KINDS.contains(&event) {
            return true;
        }
        event
            .strip_prefix(self.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|suffix| SUBJECT_SUFFIXES.contains(&suffix))
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SubjectKind {
    fn from(value: &str) -> Self {
        match value {
            "driver" => Self::Driver,
            "vehicle" => Self::Vehicle,
            "position" => Self::Position,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One observed or replayed position update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEvent {
    pub event: String,
    pub subject_id: String,
    pub location: LatLng,
    /// Metres per second.
    pub speed: Option<f64>,
    /// Degrees. `-1` means unknown.
    pub heading: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// Sequence index when the event belongs to a replay.
    pub index: Option<usize>,
}

impl LocationEvent {
    /// Speed when it is usable for pacing.
    #[must_use]
    pub fn mps(&self) -> Option<f64> {
        self.speed.filter(|s| s.is_finite() && *s > 0.0)
    }

    #[must_use]
    pub fn heading(&self) -> Option<f64> {
        known_heading(self.heading)
    }
}

impl TryFrom<&ChannelMessage> for LocationEvent {
    type Error = Error;

    fn try_from(message: &ChannelMessage) -> Result<Self, Self::Error> {
        let payload = LocationPayload::deserialize(&message.data)?;
        let location = LatLng::from_geojson(&payload.location.coordinates)?;

        Ok(Self {
            event: message.event.clone(),
            subject_id: payload.id,
            location,
            speed: payload.speed,
            heading: payload.heading,
            created_at: message.created_at,
            index: payload.additional_data.and_then(|extra| extra.index),
        })
    }
}

/// The `data` member of an inbound location message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationPayload {
    #[serde(deserialize_with = "lenient_string")]
    id: String,
    location: GeoPoint,
    #[serde(default, deserialize_with = "lenient_f64")]
    speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    heading: Option<f64>,
    #[serde(default)]
    additional_data: Option<AdditionalData>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeoPoint {
    coordinates: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct AdditionalData {
    #[serde(default, deserialize_with = "lenient_index")]
    index: Option<usize>,
}

// Numbers arrive as numbers, numeric strings, or null depending on the device.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

// A negative or garbled index is dropped, not the whole event.
fn lenient_index<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<usize>().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("expected subject id, got {other}"))),
    }
}

/// A resource being visually tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSubject {
    pub id: String,
    pub kind: SubjectKind,
    pub location: Option<LatLng>,
    pub heading: Option<f64>,
    pub online: bool,
}

impl TrackedSubject {
    #[must_use]
    pub fn new(kind: impl Into<SubjectKind>, id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: kind.into(), location: None, heading: None, online: false }
    }

    #[must_use]
    pub const fn with_location(mut self, location: LatLng) -> Self {
        self.location = Some(location);
        self
    }

    /// Default channel identifier, `"<kind>.<id>"`.
    #[must_use]
    pub fn channel_id(&self) -> String {
        format!("{}.{}", self.kind, self.id)
    }

    /// Record the outcome of an applied location event.
    pub fn apply(&mut self, event: &LocationEvent) {
        self.location = Some(event.location);
        if let Some(heading) = event.heading() {
            self.heading = Some(heading);
        }
        self.online = true;
    }
}
