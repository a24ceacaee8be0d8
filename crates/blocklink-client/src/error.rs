//! Client error types.

use std::time::Duration;

use blocklink_core::{FrameError, HandshakeError, SessionError};
use thiserror::Error;

/// Errors from connecting and sending.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Operation requires a connection
    #[error("client is not connected")]
    NotConnected,

    /// `connect` called while a connection is live
    #[error("client is already connected")]
    AlreadyConnected,

    /// `connect` called while another connect is in flight
    #[error("client is already connecting")]
    Connecting,

    /// First frame from the server did not assign an identity
    #[error("server did not announce a client identity")]
    MissingIdentity,

    /// Handshake failed
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Reading the identity frame failed
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Session rejected the operation
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Errors from [`crate::StubConnection::request`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No response within the allotted time
    #[error("no response after {0:?}")]
    Timeout(Duration),

    /// Connection closed before a response arrived
    #[error("connection closed while waiting for a response")]
    Disconnected,

    /// Request could not be sent
    #[error("send failed: {0}")]
    Send(#[from] SessionError),
}

impl RequestError {
    /// Returns true if retrying the request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
