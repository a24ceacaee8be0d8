//! Error types for the blocklink connection core.
//!
//! Strongly-typed errors for each layer: handshake errors (negotiation,
//! length validation, key exchange), frame errors (steady-state reads and
//! writes) and session errors (lifecycle misuse).
//!
//! Socket failures are carried as strings plus an [`io::ErrorKind`] so the
//! errors stay `Clone + PartialEq` and can be matched in tests.

use std::{io, time::Duration};

use blocklink_crypto::CryptoError;
use blocklink_proto::ProtocolError;
use thiserror::Error;

/// Errors that end a handshake attempt.
///
/// Every variant is fatal for the attempt. A failed handshake never yields a
/// stub.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Offers had no algorithm in common
    #[error("no common {stage} algorithm")]
    NoCommonAlgorithm {
        /// Which selection failed (`key exchange` or `symmetric`)
        stage: &'static str,
    },

    /// Peer sent a negative length or count
    #[error("negative length on the wire: {0}")]
    NegativeLength(i32),

    /// Peer sent a field larger than the configured limit
    #[error("handshake field of {len} bytes exceeds limit of {max}")]
    FieldTooLarge {
        /// Announced length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Negotiated block cannot hold the 4-byte length prefix plus data
    #[error("block size of {0} bytes is too small")]
    BlockSizeTooSmall(usize),

    /// Key exchange or transform construction failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Handshake record did not decode
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl HandshakeError {
    /// Returns true if a fresh attempt may succeed.
    ///
    /// Only timeouts qualify. Disjoint offers or a malformed peer fail the
    /// same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<io::Error> for HandshakeError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors from reading or writing steady-state frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Decoded length prefix was negative
    #[error("negative frame length: {0}")]
    NegativeLength(i32),

    /// Frame payload exceeds the configured maximum
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Payload length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Stream ended in the middle of a frame
    #[error("truncated frame: expected {expected} bytes, got {read}")]
    Truncated {
        /// Bytes the frame needed
        expected: usize,
        /// Bytes actually read
        read: usize,
    },

    /// Payload could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),

    /// Payload did not deserialize
    #[error("decode failed: {0}")]
    Decode(String),

    /// Block transform rejected the frame
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Write attempted after the stub was closed
    #[error("stub is closed")]
    Closed,

    /// Socket error
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        /// Kind of the underlying I/O error
        kind: io::ErrorKind,
        /// Rendered I/O error
        message: String,
    },
}

impl FrameError {
    /// Returns true if this error is transient and the read may be retried.
    ///
    /// Only socket timeouts and interruptions are transient. Everything else
    /// leaves the stream at an unknown frame boundary.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted,
                ..
            }
        )
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        Self::Transport { kind: err.kind(), message: err.to_string() }
    }
}

impl From<ProtocolError> for FrameError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encode(msg) => Self::Encode(msg),
            ProtocolError::Decode(msg) => Self::Decode(msg),
        }
    }
}

/// Errors from session lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation requires a connected session
    #[error("session is not connected")]
    NotConnected,

    /// Frame could not be written
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        assert!(HandshakeError::Timeout { elapsed: Duration::from_secs(31) }.is_transient());

        let timed_out = FrameError::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(timed_out.is_transient());
    }

    #[test]
    fn protocol_violations_are_fatal() {
        assert!(!HandshakeError::NoCommonAlgorithm { stage: "symmetric" }.is_transient());
        assert!(!HandshakeError::NegativeLength(-1).is_transient());
        assert!(!HandshakeError::FieldTooLarge { len: 1 << 20, max: 1 << 16 }.is_transient());

        assert!(!FrameError::NegativeLength(-4).is_transient());
        assert!(!FrameError::Truncated { expected: 32, read: 16 }.is_transient());
        assert!(!FrameError::Decode("bad".to_string()).is_transient());

        let reset = FrameError::from(io::Error::new(io::ErrorKind::ConnectionReset, "gone"));
        assert!(!reset.is_transient());
    }

    #[test]
    fn protocol_errors_keep_direction() {
        assert_eq!(
            FrameError::from(ProtocolError::Decode("x".to_string())),
            FrameError::Decode("x".to_string())
        );
        assert_eq!(
            FrameError::from(ProtocolError::Encode("y".to_string())),
            FrameError::Encode("y".to_string())
        );
    }
}
