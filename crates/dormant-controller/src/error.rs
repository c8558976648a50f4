use std::time::Duration;

use thiserror::Error;

use dormant_executor::http::HttpError;

/// Failure of an outward notification or wake call. Logged, never fatal.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid escalation target: {0}")]
    InvalidTarget(String),

    #[error("wake-on-lan failed: {0}")]
    Wake(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("resource not configured: {0}")]
    UnknownResource(String),
}
