//! Serializer contract.
//!
//! The framing layer and the handshake both take a serializer by value
//! (usually behind an `Arc`) instead of consulting a global type table. Tests
//! substitute their own.

use std::io;

use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Turns a typed message into bytes and back.
///
/// # Invariants
///
/// - `deserialize(serialize(m)) == m` for every message the serializer
///   accepts.
/// - `output_size(m)` equals the number of bytes `serialize(m)` appends.
pub trait Serializer<M>: Send + Sync + 'static {
    /// Append the encoding of `message` to `sink`.
    fn serialize(&self, message: &M, sink: &mut Vec<u8>) -> Result<()>;

    /// Decode one message from `source`.
    fn deserialize(&self, source: &[u8]) -> Result<M>;

    /// Encoded size of `message` in bytes.
    fn output_size(&self, message: &M) -> Result<usize>;
}

/// CBOR serializer for any serde type.
///
/// CBOR is self-describing and compact, and decoding a hostile buffer fails
/// with an error instead of allocating unbounded memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborSerializer;

impl<M> Serializer<M> for CborSerializer
where
    M: Serialize + DeserializeOwned,
{
    fn serialize(&self, message: &M, sink: &mut Vec<u8>) -> Result<()> {
        ciborium::into_writer(message, sink).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn deserialize(&self, source: &[u8]) -> Result<M> {
        ciborium::from_reader(source).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    fn output_size(&self, message: &M) -> Result<usize> {
        let mut counter = ByteCounter(0);
        ciborium::into_writer(message, &mut counter)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(counter.0)
    }
}

/// Writer that only counts.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
