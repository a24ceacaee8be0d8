//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from key generation, key import and transforms.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key pair could not be generated.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Persisted key could not be read or written.
    #[error("key storage failed: {0}")]
    KeyStorage(String),

    /// Persisted key does not have the configured size.
    #[error("stored key is {actual} bits, expected {expected}")]
    KeySizeMismatch {
        /// Configured key size in bits
        expected: usize,
        /// Size of the key found on disk
        actual: usize,
    },

    /// Peer public key could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// `encrypt` called before the peer public key was set.
    #[error("peer public key not set")]
    MissingPublicKey,

    /// `decrypt` or `public_key` called before keys were generated.
    #[error("key pair not generated")]
    MissingPrivateKey,

    /// Ciphertext is not a whole number of modulus blocks.
    #[error("ciphertext length {len} is not a multiple of the {block}-byte modulus")]
    InvalidCiphertextLength {
        /// Ciphertext length in bytes
        len: usize,
        /// Modulus size in bytes
        block: usize,
    },

    /// RSA primitive failed (padding check, message too long).
    #[error("rsa operation failed: {0}")]
    Rsa(String),

    /// Algorithm does not support the requested key size.
    #[error("{algorithm} does not support {key_size}-bit keys")]
    UnsupportedKeySize {
        /// Algorithm identifier
        algorithm: String,
        /// Requested key size in bits
        key_size: u32,
    },

    /// Key package does not fit the negotiated algorithm.
    #[error("invalid key package: {0}")]
    InvalidKeyPackage(String),

    /// Buffer handed to a block transform is not block aligned.
    #[error("buffer length {len} is not a multiple of the {block}-byte block")]
    UnalignedBuffer {
        /// Buffer length in bytes
        len: usize,
        /// Block size in bytes
        block: usize,
    },
}

impl From<rsa::Error> for CryptoError {
    fn from(err: rsa::Error) -> Self {
        Self::Rsa(err.to_string())
    }
}
