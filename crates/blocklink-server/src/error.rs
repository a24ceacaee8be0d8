//! Server error types.

use std::io;

use blocklink_core::{FrameError, HandshakeError};

/// Errors that can occur in the server.
///
/// Failures of a single connection never surface here; they are logged and
/// the connection is dropped. What remains is what stops the server as a
/// whole from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error (unknown algorithm, empty algorithm list, etc.).
    ///
    /// Fatal: fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Transport/network error outside any single connection.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Handshake failure, when a caller negotiates a stub by hand.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Identity frame could not be written to a new client.
    #[error("failed to establish client: {0}")]
    Establish(#[from] FrameError),
}
