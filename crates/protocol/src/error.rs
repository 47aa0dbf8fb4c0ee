//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize an envelope.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Envelope carried a type tag this implementation does not recognize.
    #[error("unknown message type: {msg_type}")]
    UnknownMessageType {
        /// The unrecognized type tag.
        msg_type: String,
    },

    /// Payload bytes did not match the shape required by the type tag.
    #[error("invalid {msg_type} payload: {reason}")]
    InvalidPayload {
        /// The type tag the payload was decoded against.
        msg_type: String,
        /// Why the payload was rejected.
        reason: String,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
