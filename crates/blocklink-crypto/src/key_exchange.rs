//! Key-exchange algorithms.
//!
//! The set is closed: the identity transform that protects the very first
//! offer exchange, and RSA at a configured key size. [`KeyExchangeAlgorithm`]
//! is what gets offered and compared; [`KeyExchange`] is the live object a
//! handshake builds from the winner.

use std::path::PathBuf;

use crate::{
    algorithm::{Algorithm, AlgorithmDescriptor},
    asymmetric::RsaKeyExchange,
    error::CryptoError,
};

/// Where RSA key pairs come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyLifetime {
    /// Fresh key pair per connection.
    #[default]
    Ephemeral,
    /// One key pair shared by every connection, stored as PKCS#1 PEM at this
    /// path and created on first use.
    Persisted(PathBuf),
}

/// Key-exchange algorithm that can be offered during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchangeAlgorithm {
    /// No-op transform. Protects the bootstrap offer exchange; offered only
    /// by unencrypted configurations.
    Identity,
    /// RSA with PKCS#1 v1.5 padding.
    Rsa {
        /// Modulus size in bits
        key_size: u32,
    },
}

impl KeyExchangeAlgorithm {
    /// RSA-512. Only fit for tests.
    pub const RSA_512: Self = Self::Rsa { key_size: 512 };
    /// RSA-1024
    pub const RSA_1024: Self = Self::Rsa { key_size: 1024 };
    /// RSA-2048
    pub const RSA_2048: Self = Self::Rsa { key_size: 2048 };
    /// RSA-4096
    pub const RSA_4096: Self = Self::Rsa { key_size: 4096 };

    /// Parse an identifier such as `RSA-2048` or `None`.
    ///
    /// Only 512, 1024, 2048 and 4096-bit RSA are recognised.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        if identifier.eq_ignore_ascii_case("none") {
            return Some(Self::Identity);
        }
        let bits = identifier.strip_prefix("RSA-").or_else(|| identifier.strip_prefix("rsa-"))?;
        match bits.parse().ok()? {
            key_size @ (512 | 1024 | 2048 | 4096) => Some(Self::Rsa { key_size }),
            _ => None,
        }
    }

    /// Build the live key exchange. Keys are not generated yet.
    pub fn build(&self, lifetime: &KeyLifetime) -> KeyExchange {
        match self {
            Self::Identity => KeyExchange::Identity,
            Self::Rsa { key_size } => {
                KeyExchange::Rsa(Box::new(RsaKeyExchange::new(*key_size as usize, lifetime.clone())))
            },
        }
    }
}

impl Algorithm for KeyExchangeAlgorithm {
    fn descriptor(&self) -> AlgorithmDescriptor {
        match self {
            Self::Identity => AlgorithmDescriptor {
                identifier: "None".to_string(),
                key_size: 0,
                strength: 0,
                block_size: None,
            },
            Self::Rsa { key_size } => AlgorithmDescriptor {
                identifier: format!("RSA-{key_size}"),
                key_size: *key_size,
                strength: *key_size,
                block_size: None,
            },
        }
    }
}

/// Live key exchange used to protect handshake payloads.
pub enum KeyExchange {
    /// Payloads pass through unchanged.
    Identity,
    /// Chunked RSA.
    Rsa(Box<RsaKeyExchange>),
}

impl KeyExchange {
    /// Generate (or load) the local key pair.
    pub fn generate_keys(&mut self) -> Result<(), CryptoError> {
        match self {
            Self::Identity => Ok(()),
            Self::Rsa(rsa) => rsa.generate_keys(),
        }
    }

    /// Local public key for the peer. Empty for the identity transform.
    pub fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::Identity => Ok(Vec::new()),
            Self::Rsa(rsa) => rsa.public_key(),
        }
    }

    /// Import the peer public key.
    pub fn set_public_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        match self {
            Self::Identity => Ok(()),
            Self::Rsa(rsa) => rsa.set_public_key(key),
        }
    }

    /// Protect `data` for the peer.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Rsa(rsa) => rsa.encrypt(data),
        }
    }

    /// Recover data the peer protected for us.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Rsa(rsa) => rsa.decrypt(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_round_trip() {
        for alg in [
            KeyExchangeAlgorithm::Identity,
            KeyExchangeAlgorithm::RSA_512,
            KeyExchangeAlgorithm::RSA_2048,
        ] {
            let id = alg.descriptor().identifier;
            assert_eq!(KeyExchangeAlgorithm::from_identifier(&id), Some(alg));
        }
        assert_eq!(KeyExchangeAlgorithm::from_identifier("DH-2048"), None);
        assert_eq!(KeyExchangeAlgorithm::from_identifier("RSA-big"), None);
    }

    #[test]
    fn unsupported_rsa_sizes_are_rejected() {
        assert_eq!(KeyExchangeAlgorithm::from_identifier("rsa-4096"), Some(KeyExchangeAlgorithm::RSA_4096));
        for id in ["RSA-99999", "RSA-0", "RSA-768", "RSA-2047"] {
            assert_eq!(KeyExchangeAlgorithm::from_identifier(id), None, "{id}");
        }
    }

    #[test]
    fn larger_rsa_is_stronger() {
        let small = KeyExchangeAlgorithm::RSA_1024.descriptor();
        let large = KeyExchangeAlgorithm::RSA_2048.descriptor();
        let none = KeyExchangeAlgorithm::Identity.descriptor();

        assert!(large.strength > small.strength);
        assert!(small.strength > none.strength);
    }

    #[test]
    fn identity_is_transparent() {
        let mut kx = KeyExchangeAlgorithm::Identity.build(&KeyLifetime::Ephemeral);
        kx.generate_keys().unwrap();
        kx.set_public_key(b"ignored").unwrap();

        assert!(kx.public_key().unwrap().is_empty());
        assert_eq!(kx.encrypt(b"abc").unwrap(), b"abc");
        assert_eq!(kx.decrypt(b"abc").unwrap(), b"abc");
    }
}
