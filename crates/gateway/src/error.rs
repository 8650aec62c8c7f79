//! Gateway error types.

use common::RequestError;
use store::StoreError;
use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A request was rejected with a wire-visible error.
    #[error("{0}")]
    Rejected(#[from] RequestError),

    /// Store failure; surfaced to callers as `Unknown error`.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error.
    #[error("Channel send error")]
    ChannelSend,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The error string to put on the wire. Internal failures collapse to
    /// `Unknown error` after being logged by the caller.
    pub fn to_wire(&self) -> RequestError {
        match self {
            GatewayError::Rejected(e) => *e,
            _ => RequestError::Unknown,
        }
    }

    /// Whether this is an internal failure worth an error-level log line.
    pub fn is_internal(&self) -> bool {
        !matches!(self, GatewayError::Rejected(_))
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
