//! Request error strings surfaced on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a route may return inside a `{success: false, error: ...}` reply.
///
/// The display strings are the wire contract; serde uses the same spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RequestError {
    /// The request arrived on a transport that cannot carry it.
    #[error("Invalid connection")]
    #[serde(rename = "Invalid connection")]
    InvalidConnection,

    /// Schema validation failed.
    #[error("Invalid request")]
    #[serde(rename = "Invalid request")]
    InvalidRequest,

    /// Internal failure; retry permitted.
    #[error("Unknown error")]
    #[serde(rename = "Unknown error")]
    Unknown,

    #[error("Peer not found")]
    #[serde(rename = "Peer not found")]
    PeerNotFound,

    #[error("Peer not authenticated")]
    #[serde(rename = "Peer not authenticated")]
    PeerNotAuthenticated,

    #[error("Peer is not subscribed to channel")]
    #[serde(rename = "Peer is not subscribed to channel")]
    PeerNotSubscribed,

    #[error("Channel not found")]
    #[serde(rename = "Channel not found")]
    ChannelNotFound,

    #[error("Recipient not found")]
    #[serde(rename = "Recipient not found")]
    RecipientNotFound,
}
