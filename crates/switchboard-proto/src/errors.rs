//! Protocol error types.

use thiserror::Error;

/// Result alias for wire decoding and encoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding wire payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is not a JSON envelope with a `type` field.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Envelope kind is known but its `data` body does not match.
    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload {
        /// Wire name of the event kind
        kind: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Timestamp could not be normalized.
    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    /// Outgoing frame could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}
