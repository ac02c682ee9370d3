#![allow(missing_docs)]
#![allow(dead_code)]

use std::any::Any;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use http::{Method, Request, Response, StatusCode};
use movement::{LatLng, Movable};
use realtime::{Config, HttpRequest};
use replay::{Metrics, PositionRecord};
use replay::session::Point;

pub const POSITIONS_URL: &str = "http://localhost:8080";

/// Positions backend serving canned records and metrics.
#[derive(Clone, Default)]
pub struct MockProvider {
    records: Vec<PositionRecord>,
    metrics: Metrics,
    status: Option<StatusCode>,
    requests: Arc<Mutex<Vec<(Method, String)>>>,
}

impl MockProvider {
    #[must_use]
    pub fn new(records: Vec<PositionRecord>) -> Self {
        let metrics = Metrics {
            total_distance: 1_520.5,
            total_duration: 600.0,
            max_speed: 16.2,
            avg_speed: 8.4,
            speeding_events: 2,
            dwell_events: 1,
            acceleration_events: 0,
        };
        Self { records, metrics, ..Self::default() }
    }

    /// Every request is answered with `status`.
    #[must_use]
    pub fn failing(status: StatusCode) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Method and path-and-query of every request received.
    #[must_use]
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.requests.lock().expect("should lock").clone()
    }
}

impl Config for MockProvider {
    async fn get(&self, key: &str) -> Result<String> {
        match key {
            "POSITIONS_URL" => Ok(POSITIONS_URL.to_string()),
            _ => Err(anyhow!("unknown config key: {key}")),
        }
    }
}

impl HttpRequest for MockProvider {
    async fn fetch<T>(&self, request: Request<T>) -> Result<Response<Bytes>>
    where
        T: http_body::Body + Any,
        T::Data: Into<Vec<u8>>,
        T::Error: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        let target = request.uri().path_and_query().map(ToString::to_string).unwrap_or_default();
        self.requests.lock().expect("should lock").push((request.method().clone(), target));

        if let Some(status) = self.status {
            return Response::builder()
                .status(status)
                .body(Bytes::from_static(b"backend unavailable"))
                .context("failed to build response");
        }

        let data = match (request.method(), request.uri().path()) {
            (&Method::GET, "/positions") => {
                serde_json::to_vec(&self.records).context("failed to serialize positions")?
            }
            (&Method::POST, "/positions/metrics") => {
                serde_json::to_vec(&self.metrics).context("failed to serialize metrics")?
            }
            (method, path) => return Err(anyhow!("unknown route: {method} {path}")),
        };

        Response::builder().status(200).body(Bytes::from(data)).context("failed to build response")
    }
}

/// Marker that records every movement.
#[derive(Debug, Default)]
pub struct RecordingMarker {
    state: Mutex<MarkerState>,
}

#[derive(Debug, Default, Clone)]
pub struct MarkerState {
    pub position: LatLng,
    pub moves: Vec<(LatLng, Duration)>,
}

impl RecordingMarker {
    #[must_use]
    pub fn at(position: LatLng) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(MarkerState { position, moves: Vec::new() }) })
    }

    #[must_use]
    pub fn state(&self) -> MarkerState {
        self.state.lock().expect("should lock").clone()
    }

    #[must_use]
    pub fn positions(&self) -> Vec<LatLng> {
        self.state().moves.into_iter().map(|(to, _)| to).collect()
    }
}

impl Movable for RecordingMarker {
    fn position(&self) -> LatLng {
        self.state.lock().expect("should lock").position
    }

    fn set_position(&self, to: LatLng) {
        self.animate_to(to, Duration::ZERO);
    }

    fn animate_to(&self, to: LatLng, duration: Duration) {
        let mut state = self.state.lock().expect("should lock");
        state.position = to;
        state.moves.push((to, duration));
    }
}

#[must_use]
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).single().expect("valid time")
        + chrono::Duration::seconds(offset_secs)
}

/// The `n`th point of a short northbound route.
#[must_use]
pub fn point(n: usize) -> LatLng {
    #[allow(clippy::cast_precision_loss)]
    let step = n as f64 * 0.001;
    LatLng::new(-36.85 + step, 174.76)
}

#[must_use]
pub fn record(n: usize, speed: Option<f64>, offset_secs: i64) -> PositionRecord {
    let location = point(n);
    PositionRecord {
        id: format!("pos_{n}"),
        subject_id: "driver_1".to_string(),
        order_id: Some("order_9".to_string()),
        coordinates: Point { coordinates: vec![location.lng, location.lat] },
        speed,
        heading: None,
        created_at: at(offset_secs),
    }
}

/// `count` records one minute apart with unknown speed.
#[must_use]
pub fn route(count: usize) -> Vec<PositionRecord> {
    (0..count).map(|n| record(n, None, i64::try_from(n).expect("small") * 60)).collect()
}
