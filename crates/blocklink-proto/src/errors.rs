//! Protocol error types.

use thiserror::Error;

/// Result alias for serializer operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while turning messages into bytes and back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes did not decode into a message.
    ///
    /// Fatal for the frame that carried them. The connection layer reports
    /// this as a read error and tears the connection down.
    #[error("decode failed: {0}")]
    Decode(String),
}
