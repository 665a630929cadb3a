// Probe and aggregation error taxonomy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Why a single probe did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The measurement is not supported on this platform.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The probe's deadline elapsed before it produced a value.
    #[error("timed out")]
    Timeout,

    /// An external tool or kernel file returned output we could not parse.
    #[error("malformed output: {0}")]
    Malformed(String),

    /// Any other OS or tool failure.
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProbeError::Unavailable(_) => FailureKind::Unavailable,
            ProbeError::PermissionDenied(_) => FailureKind::PermissionDenied,
            ProbeError::Timeout => FailureKind::Timeout,
            ProbeError::Malformed(_) => FailureKind::Malformed,
            ProbeError::Failed(_) => FailureKind::Failed,
            ProbeError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => ProbeError::PermissionDenied(e.to_string()),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::Unsupported => {
                ProbeError::Unavailable(e.to_string())
            }
            std::io::ErrorKind::InvalidData => ProbeError::Malformed(e.to_string()),
            std::io::ErrorKind::TimedOut => ProbeError::Timeout,
            _ => ProbeError::Failed(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(e: serde_json::Error) -> Self {
        ProbeError::Malformed(e.to_string())
    }
}

/// Serializable tag of a [`ProbeError`], as it appears in snapshot `errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unavailable,
    PermissionDenied,
    Timeout,
    Malformed,
    Failed,
    Cancelled,
}

/// Hard failures that abort a whole aggregation instead of degrading it.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// Listing the sub-targets of a domain (partitions, processes) failed.
    #[error("{domain}: enumeration failed: {source}")]
    Enumeration {
        domain: String,
        #[source]
        source: ProbeError,
    },

    /// The domain's required probe failed, so no snapshot is built.
    #[error("{domain}: required probe {probe} failed: {source}")]
    RequiredProbe {
        domain: String,
        probe: String,
        #[source]
        source: ProbeError,
    },

    /// The overall deadline elapsed with nothing collected.
    #[error("{domain}: request timed out")]
    Timeout { domain: String },

    #[error("invalid aggregation spec: {0}")]
    InvalidSpec(String),
}

impl AggregateError {
    pub fn status(&self) -> StatusCode {
        match self {
            AggregateError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Enumeration failures make every later iteration pointless, so streams stop on them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AggregateError::Enumeration { .. } | AggregateError::InvalidSpec(_)
        )
    }
}

impl IntoResponse for AggregateError {
    fn into_response(self) -> Response {
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
