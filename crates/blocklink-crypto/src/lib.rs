//! Blocklink Cryptographic Primitives
//!
//! Building blocks for the link handshake and the encrypted framing layer.
//! Nothing here touches a socket; the negotiator in `blocklink-core` drives
//! these types over a stream.
//!
//! # Key Lifecycle
//!
//! ```text
//! Offer lists (identity transform)
//!        │
//!        ▼
//! Strongest common key exchange → RSA key pair per side
//!        │
//!        ▼
//! Offer lists (RSA, chunked) → strongest common symmetric algorithm
//!        │
//!        ▼
//! KeyPackage per side (RSA, chunked) → encrypt / decrypt transforms
//! ```
//!
//! Each direction of a link uses its own key and IV: the local package
//! builds the encrypt transform, the peer's package builds the decrypt
//! transform. Key packages are zeroized on drop and never persisted.
//!
//! # Security
//!
//! - Algorithms are a closed set ([`KeyExchangeAlgorithm`],
//!   [`SymmetricAlgorithm`]). Strength is a comparison key only.
//! - RSA uses PKCS#1 v1.5 padding with payloads chunked below the modulus.
//! - AES runs in CBC mode chained across frames for the lifetime of the
//!   link. Frames are block aligned, so no cipher padding is applied.
//! - There is no authentication of the peer. This is not a TLS replacement.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod algorithm;
mod asymmetric;
mod error;
mod key_exchange;
mod symmetric;
mod transform;

pub use algorithm::{Algorithm, AlgorithmContainer, AlgorithmDescriptor, select_strongest};
pub use asymmetric::{PKCS1_OVERHEAD, RsaKeyExchange};
pub use error::CryptoError;
pub use key_exchange::{KeyExchange, KeyExchangeAlgorithm, KeyLifetime};
pub use symmetric::{KeyPackage, SymmetricAlgorithm};
pub use transform::{DecryptTransform, EncryptTransform};
