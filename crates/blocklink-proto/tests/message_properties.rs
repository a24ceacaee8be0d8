//! Property-based tests for the message envelope and CBOR serializer.
//!
//! The framing layer trusts `output_size` to size its buffers and trusts
//! `deserialize` to recover exactly what was written, so both are checked
//! for arbitrary keys, identities and payloads.

use blocklink_proto::{CborSerializer, ClientId, Envelope, Message, Serializer, keys};
use bytes::Bytes;
use proptest::prelude::*;

/// Strategy for messages with arbitrary keys, ids and payloads up to 4KB
fn arbitrary_message() -> impl Strategy<Value = Message> {
    (any::<i32>(), proptest::option::of(any::<u128>()), prop::collection::vec(any::<u8>(), 0..4096))
        .prop_map(|(key, id, payload)| Message {
            key,
            client_id: id.map(ClientId::from_u128),
            payload: Bytes::from(payload),
        })
}

#[test]
fn prop_serializer_round_trip() {
    proptest!(|(msg in arbitrary_message())| {
        let mut buf = Vec::new();
        CborSerializer.serialize(&msg, &mut buf).expect("encode should succeed");

        let decoded: Message = CborSerializer.deserialize(&buf).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded, msg);
    });
}

#[test]
fn prop_output_size_is_exact() {
    proptest!(|(msg in arbitrary_message())| {
        let mut buf = Vec::new();
        CborSerializer.serialize(&msg, &mut buf).expect("encode should succeed");

        // PROPERTY: Reported size must equal bytes written
        let reported = Serializer::<Message>::output_size(&CborSerializer, &msg)
            .expect("size should succeed");
        prop_assert_eq!(reported, buf.len());
    });
}

#[test]
fn prop_only_identity_key_assigns_identity() {
    proptest!(|(key in any::<i32>(), raw in any::<u128>())| {
        let id = ClientId::from_u128(raw);
        let msg = Message::new(key, Bytes::new()).with_client_id(id);

        // PROPERTY: Identity is only announced under the reserved key
        if key == keys::IDENTITY {
            prop_assert_eq!(msg.assigned_identity(), Some(id));
        } else {
            prop_assert_eq!(msg.assigned_identity(), None);
        }
    });
}
