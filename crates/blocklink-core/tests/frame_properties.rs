//! Property-based tests for block framing.
//!
//! Frames are pushed through an in-memory duplex with real AES transforms.
//! Every frame must occupy whole blocks and give back exactly the payload
//! that went in, including payloads whose `len + 4` is block aligned.

use std::sync::Arc;

use blocklink_core::{FrameReader, FrameWriter, LENGTH_PREFIX, ReadOutcome, SharedSerializer, padded_frame_len};
use blocklink_crypto::SymmetricAlgorithm;
use blocklink_proto::{CborSerializer, Message, MessageKey};
use proptest::prelude::*;
use tokio::io::duplex;

fn arbitrary_algorithm() -> impl Strategy<Value = SymmetricAlgorithm> {
    prop_oneof![
        Just(SymmetricAlgorithm::Identity),
        Just(SymmetricAlgorithm::AES_128),
        Just(SymmetricAlgorithm::AES_192),
        Just(SymmetricAlgorithm::AES_256),
    ]
}

fn arbitrary_message() -> impl Strategy<Value = Message> {
    (any::<MessageKey>(), prop::collection::vec(any::<u8>(), 0..600))
        .prop_map(|(key, payload)| Message::new(key, payload))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #[test]
    fn padded_len_is_block_multiple(len in 0usize..100_000, block in 5usize..64) {
        let total = padded_frame_len(len, block);

        // PROPERTY: Whole blocks, room for prefix and payload, at most one
        // block of padding
        prop_assert_eq!(total % block, 0);
        prop_assert!(total > len + LENGTH_PREFIX);
        prop_assert!(total <= len + LENGTH_PREFIX + block);
    }

    #[test]
    fn frames_round_trip_through_transforms(
        algorithm in arbitrary_algorithm(),
        messages in prop::collection::vec(arbitrary_message(), 1..8),
    ) {
        let package = algorithm.generate_key_package();
        let serializer: SharedSerializer<Message> = Arc::new(CborSerializer);

        runtime().block_on(async {
            let (a, b) = duplex(1 << 20);
            let mut writer = FrameWriter::new(a, algorithm.encryptor(&package).unwrap(), 16, 1 << 20, serializer.clone());
            let mut reader = FrameReader::new(b, algorithm.decryptor(&package).unwrap(), 16, 1 << 20, serializer);

            let mut sizes = Vec::new();
            for msg in &messages {
                sizes.push(writer.write(msg).await.unwrap());
            }

            for (msg, written) in messages.iter().zip(sizes) {
                // PROPERTY: Output is a multiple of the block size
                prop_assert_eq!(written % 16, 0);

                match reader.read_next().await {
                    ReadOutcome::Message { message, size } => {
                        // PROPERTY: Exact message and byte count recovered
                        prop_assert_eq!(&message, msg);
                        prop_assert_eq!(size, written);
                    },
                    other => prop_assert!(false, "expected message, got {:?}", other),
                }
            }
            Ok(())
        })?;
    }
}
