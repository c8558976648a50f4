//! Executor error types. Opaque to the controller beyond logging.

use std::time::Duration;

use thiserror::Error;

use crate::http::HttpError;

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{op} returned HTTP {status}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid resource id: {0:?}")]
    InvalidResource(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}
