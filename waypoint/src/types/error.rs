//! Error types for Waypoint

use hyper::StatusCode;
use uuid::Uuid;

/// Main error type for Waypoint operations
#[derive(Debug, thiserror::Error)]
pub enum WaypointError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{tier} tier timed out after {elapsed_ms}ms")]
    TierTimeout { tier: String, elapsed_ms: u64 },

    #[error("Tier unavailable: {0}")]
    TierUnavailable(String),

    #[error("Write buffer at capacity ({saturation}% full)")]
    CapacityExceeded { saturation: u8 },

    #[error("Write {operation_id} exhausted its retries: {cause}")]
    RetryExhausted { operation_id: Uuid, cause: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WaypointError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TierTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::TierUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RetryExhausted { .. } => StatusCode::BAD_GATEWAY,
            Self::Ledger(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for WaypointError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for WaypointError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for WaypointError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for WaypointError {
    fn from(err: reqwest::Error) -> Self {
        Self::Ledger(err.to_string())
    }
}

/// Result type alias for Waypoint operations
pub type Result<T> = std::result::Result<T, WaypointError>;
