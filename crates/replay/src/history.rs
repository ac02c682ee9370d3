//! Queries against the positions backend.

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Response};
use http_body_util::{Empty, Full};
use realtime::{Config, Error, HttpRequest, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::session::PositionRecord;

/// Filter for recorded positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionQuery {
    pub subject_id: String,
    pub order_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl PositionQuery {
    #[must_use]
    pub fn subject(subject_id: impl Into<String>) -> Self {
        Self { subject_id: subject_id.into(), ..Self::default() }
    }

    #[must_use]
    pub fn order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    #[must_use]
    pub const fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    #[must_use]
    pub fn to_query(&self) -> String {
        let mut params = vec![format!("subject={}", urlencoding::encode(&self.subject_id))];
        if let Some(order_id) = &self.order_id {
            params.push(format!("order={}", urlencoding::encode(order_id)));
        }
        if let Some(start) = self.start {
            params.push(format!("start={}", encode_time(start)));
        }
        if let Some(end) = self.end {
            params.push(format!("end={}", encode_time(end)));
        }
        params.join("&")
    }
}

fn encode_time(time: DateTime<Utc>) -> String {
    urlencoding::encode(&time.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

/// Aggregate figures computed by the backend for a set of positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metrics {
    /// Metres.
    pub total_distance: f64,
    /// Seconds.
    pub total_duration: f64,
    /// Metres per second.
    pub max_speed: f64,
    /// Metres per second.
    pub avg_speed: f64,
    pub speeding_events: u32,
    pub dwell_events: u32,
    pub acceleration_events: u32,
}

/// Retrieves recorded positions matching `query`.
///
/// # Errors
///
/// Returns an error when `POSITIONS_URL` is not configured, the request fails,
/// or the response cannot be deserialized.
pub async fn positions<P>(provider: &P, query: &PositionQuery) -> Result<Vec<PositionRecord>>
where
    P: Config + HttpRequest,
{
    if query.subject_id.is_empty() {
        return Err(Error::MissingInput("position query without subject".to_string()));
    }

    let url = Config::get(provider, "POSITIONS_URL").await.context("getting `POSITIONS_URL`")?;
    let request = http::Request::builder()
        .method(Method::GET)
        .uri(format!("{url}/positions?{}", query.to_query()))
        .header(ACCEPT, "application/json")
        .body(Empty::<Bytes>::new())
        .context("building positions request")?;

    let response =
        HttpRequest::fetch(provider, request).await.context("positions request failed")?;
    let body = success(response)?;
    let records: Vec<PositionRecord> =
        serde_json::from_slice(&body).context("deserializing positions response")?;

    tracing::debug!(subject = %query.subject_id, positions = records.len(), "fetched positions");
    Ok(records)
}

/// Retrieves aggregate metrics for the positions with the given ids.
///
/// # Errors
///
/// Returns an error when `POSITIONS_URL` is not configured, the request fails,
/// or the response cannot be deserialized.
pub async fn metrics<P>(provider: &P, position_ids: &[String]) -> Result<Metrics>
where
    P: Config + HttpRequest,
{
    if position_ids.is_empty() {
        return Ok(Metrics::default());
    }

    let url = Config::get(provider, "POSITIONS_URL").await.context("getting `POSITIONS_URL`")?;
    let payload = serde_json::to_vec(&json!({ "positions": position_ids }))
        .context("serializing metrics request")?;
    let request = http::Request::builder()
        .method(Method::POST)
        .uri(format!("{url}/positions/metrics"))
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .body(Full::new(Bytes::from(payload)))
        .context("building metrics request")?;

    let response = HttpRequest::fetch(provider, request).await.context("metrics request failed")?;
    let body = success(response)?;
    let metrics = serde_json::from_slice(&body).context("deserializing metrics response")?;
    Ok(metrics)
}

fn success(response: Response<Bytes>) -> Result<Bytes> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.into_body());
    }
    let body = String::from_utf8_lossy(response.body()).into_owned();
    Err(realtime::bad_gateway!("positions backend returned {}: {}", status, body))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn query_string() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single().expect("valid");
        let end = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).single().expect("valid");
        let query = PositionQuery::subject("driver 1").order("order/9").between(start, end);

        assert_eq!(
            query.to_query(),
            "subject=driver%201&order=order%2F9&start=2024-05-01T00%3A00%3A00Z&end=2024-05-02T00%3A00%3A00Z"
        );
    }

    #[test]
    fn metrics_defaults_missing_fields() {
        let metrics: Metrics =
            serde_json::from_str(r#"{"totalDistance": 1520.5, "speedingEvents": 2}"#)
                .expect("should deserialize");
        assert_eq!(metrics.speeding_events, 2);
        assert_eq!(metrics.dwell_events, 0);
    }
}
