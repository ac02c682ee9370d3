//! Tracking and replay errors

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the workspace.
pub type Result<T> = anyhow::Result<T, Error>;

/// Domain level error type returned by the movement pipeline.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// The request payload is invalid or missing required fields.
    #[error("code: 400, description: {0}")]
    BadRequest(String),

    /// The requested resource could not be found.
    #[error("code: 404, description: {0}")]
    NotFound(String),

    /// A non recoverable internal error occurred.
    #[error("code: 500, description: {0}")]
    Internal(String),

    /// An upstream dependency failed while fulfilling the request.
    #[error("code: 502, description: {0}")]
    BadGateway(String),

    /// A message or record could not be decoded.
    #[error("code: 422, description: invalid_format {0}")]
    InvalidFormat(String),

    /// An operation was asked to work on nothing (no subject, no positions).
    #[error("code: 400, description: missing_input {0}")]
    MissingInput(String),

    /// The rendering layer has no marker for the subject.
    #[error("code: 404, description: marker_unavailable {0}")]
    MarkerUnavailable(String),

    /// Subscribing to, or reading from, a realtime channel failed.
    #[error("code: 502, description: channel {0}")]
    Channel(String),
}

impl Error {
    /// Returns the stable error code associated with the variant.
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::MissingInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::MarkerUnavailable(_) => StatusCode::NOT_FOUND,
            Self::BadGateway(_) | Self::Channel(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        let chain = err.chain().map(ToString::to_string).collect::<Vec<_>>().join(" -> ");

        // if type is Error, return it with the newly added context
        if let Some(inner) = err.downcast_ref::<Self>() {
            tracing::debug!("Error: {err}, caused by: {inner}");

            return match inner {
                Self::BadRequest(_) => Self::BadRequest(chain),
                Self::NotFound(_) => Self::NotFound(chain),
                Self::BadGateway(_) => Self::BadGateway(chain),
                Self::Internal(_) => Self::Internal(chain),
                Self::InvalidFormat(e) => Self::InvalidFormat(format!("{err}: {e}")),
                Self::MissingInput(e) => Self::MissingInput(format!("{err}: {e}")),
                Self::MarkerUnavailable(e) => Self::MarkerUnavailable(format!("{err}: {e}")),
                Self::Channel(e) => Self::Channel(format!("{err}: {e}")),
            };
        }

        // otherwise, return an Internal error
        Self::Internal(chain)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

#[macro_export]
macro_rules! bad_request {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::BadRequest(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::BadRequest(format!($err))
    };
}

#[macro_export]
macro_rules! not_found {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::NotFound(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::NotFound(format!($err))
    };
}

#[macro_export]
macro_rules! bad_gateway {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::BadGateway(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::BadGateway(format!($err))
    };
}
