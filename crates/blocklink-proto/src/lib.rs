//! Blocklink wire vocabulary.
//!
//! Everything the transport needs to know about application messages and
//! nothing more:
//!
//! - [`Message`]: the default envelope (key, optional client id, raw payload)
//! - [`Envelope`]: what the connection layer requires from any message type
//! - [`ClientId`]: 128-bit connection identity assigned by the server
//! - [`keys`]: reserved message keys
//! - [`Serializer`]: turns a typed message into bytes and back
//!
//! The framing layer never inspects message internals. It asks the
//! serializer for bytes and asks the envelope for its routing key.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod keys;
mod message;
mod serializer;

pub use errors::{ProtocolError, Result};
pub use keys::MessageKey;
pub use message::{ClientId, Envelope, Message};
pub use serializer::{CborSerializer, Serializer};
