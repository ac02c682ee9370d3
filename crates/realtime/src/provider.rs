//! # Provider
//!
//! Provider defines external data interfaces for the crate.

use std::any::Any;
use std::error::Error;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Request, Response};
use http_body::Body;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `HttpRequest` trait defines the behavior for fetching data from a source.
pub trait HttpRequest: Send + Sync {
    /// Make outbound HTTP request.
    fn fetch<T>(&self, request: Request<T>) -> impl Future<Output = Result<Response<Bytes>>> + Send
    where
        T: Body + Any + Send,
        T::Data: Into<Vec<u8>>,
        T::Error: Into<Box<dyn Error + Send + Sync + 'static>>;
}

/// The `Config` trait is used by implementers to provide configuration
/// settings (backend URLs and the like) to dependent crates.
pub trait Config: Send + Sync {
    /// Request configuration setting.
    fn get(&self, key: &str) -> impl Future<Output = Result<String>> + Send;
}

/// A message received on a realtime channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl ChannelMessage {
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value, created_at: DateTime<Utc>) -> Self {
        Self { event: event.into(), data, created_at }
    }
}

/// The `Socket` trait is the realtime pub/sub client consumed by the tracker.
///
/// Delivery is at-least-once and may be out of order. Reconnection and
/// resubscription are the implementer's concern.
pub trait Socket: Send + Sync + 'static {
    /// Subscribe to a named channel. Resolves once the subscription has been
    /// acknowledged.
    fn subscribe(
        &self, channel_id: &str,
    ) -> impl Future<Output = Result<Box<dyn Channel>>> + Send;
}

/// An open subscription to a realtime channel.
#[async_trait]
pub trait Channel: Send {
    /// The channel identifier this subscription was opened for.
    fn id(&self) -> &str;

    /// Wait for the next message. Returns `None` once the channel is closed.
    async fn next(&mut self) -> Option<ChannelMessage>;

    /// Release the subscription.
    async fn unsubscribe(&mut self) -> Result<()>;
}
