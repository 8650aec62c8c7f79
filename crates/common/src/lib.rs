//! Shared wire contract for the sinkr fan-out service.
//!
//! Everything that crosses a socket lives here: the source→server request
//! envelope, the correlated reply envelope, the server→sink frames, and the
//! error strings surfaced to callers. Pure data plus serde — no I/O.

pub mod error;
pub mod protocol;
pub mod routes;

pub use error::RequestError;
pub use protocol::{
    ChannelAuthMode, MemberInfo, MessageEvent, MessageOrigin, MessagePayload, MetadataEvent,
    SinkFrame, SinkFrameBody, SinkRequest, StoredMessageRef,
};
pub use routes::{ReplyEnvelope, RouteRequest, RouteResponse, SourceEnvelope};
