//! Default message envelope.
//!
//! A `Message` is the application-layer unit the transport carries:
//! - a routing key ([`MessageKey`])
//! - the sender's [`ClientId`], when the application stamps one
//! - raw payload bytes (already encoded by the application)
//!
//! The transport routes on the key alone. Payload bytes are never parsed
//! below the application.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keys::{self, MessageKey};

/// 128-bit identity of one connection.
///
/// Generated by the server when a connection completes its handshake and
/// announced to the client in the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Fresh random identity (UUID v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Identity from its raw 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Raw 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the connection layer needs from a message type.
///
/// Implemented by [`Message`]. Applications with their own message type
/// implement it to reuse the client and server machinery unchanged.
pub trait Envelope: Send + Sync + 'static {
    /// Routing key used to find subscribers.
    fn key(&self) -> MessageKey;

    /// Frame announcing `id` as the connection's identity.
    fn identity(id: ClientId) -> Self
    where
        Self: Sized;

    /// Identity carried by an identity frame. `None` for every other
    /// message.
    fn assigned_identity(&self) -> Option<ClientId>;
}

/// Keyed message with an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Routing key
    pub key: MessageKey,
    /// Sender or subject of the message, if stamped
    pub client_id: Option<ClientId>,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl Message {
    /// Message with `key` and `payload` and no client id.
    pub fn new(key: MessageKey, payload: impl Into<Bytes>) -> Self {
        Self { key, client_id: None, payload: payload.into() }
    }

    /// [`keys::TEXT`] message carrying UTF-8 text.
    pub fn text(text: &str) -> Self {
        Self::new(keys::TEXT, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Same message stamped with `client_id`.
    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl Envelope for Message {
    fn key(&self) -> MessageKey {
        self.key
    }

    fn identity(id: ClientId) -> Self {
        Self { key: keys::IDENTITY, client_id: Some(id), payload: Bytes::new() }
    }

    fn assigned_identity(&self) -> Option<ClientId> {
        if self.key == keys::IDENTITY { self.client_id } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_frame_has_no_payload() {
        let id = ClientId::from_u128(0x1234_5678_90ab_cdef_1234_5678_90ab_cdef);
        let msg = Message::identity(id);

        assert_eq!(msg.key, keys::IDENTITY);
        assert!(msg.payload.is_empty());
        assert_eq!(msg.assigned_identity(), Some(id));
    }

    #[test]
    fn ordinary_message_assigns_no_identity() {
        let id = ClientId::random();
        let msg = Message::text("hi").with_client_id(id);

        assert_eq!(msg.client_id, Some(id));
        assert_eq!(msg.assigned_identity(), None);
    }

    #[test]
    fn text_payload_round_trips_as_str() {
        let msg = Message::text("Hello");
        assert_eq!(msg.key(), keys::TEXT);
        assert_eq!(msg.payload_str(), Some("Hello"));

        let binary = Message::new(keys::TEXT, vec![0xff, 0xfe]);
        assert_eq!(binary.payload_str(), None);
    }

    #[test]
    fn client_id_u128_round_trip() {
        let raw = 0xdead_beef_0000_0000_0000_0000_0000_0001;
        assert_eq!(ClientId::from_u128(raw).as_u128(), raw);
        assert_ne!(ClientId::random(), ClientId::random());
    }
}
