//! Symmetric transport algorithms and session key packages.

use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    algorithm::{Algorithm, AlgorithmDescriptor},
    error::CryptoError,
    transform::{DecryptTransform, EncryptTransform},
};

/// AES block size in bits.
const AES_BLOCK_BITS: u32 = 128;

/// Symmetric algorithm that can carry steady-state frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymmetricAlgorithm {
    /// Frames pass through unencrypted. Uses the AES block size so framing
    /// is identical with and without encryption.
    Identity,
    /// AES in CBC mode, chained across the whole link.
    Aes {
        /// Key size in bits (128, 192 or 256)
        key_size: u32,
    },
}

impl SymmetricAlgorithm {
    /// AES-128
    pub const AES_128: Self = Self::Aes { key_size: 128 };
    /// AES-192
    pub const AES_192: Self = Self::Aes { key_size: 192 };
    /// AES-256
    pub const AES_256: Self = Self::Aes { key_size: 256 };

    /// Parse an identifier such as `AES-256` or `None`.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        if identifier.eq_ignore_ascii_case("none") {
            return Some(Self::Identity);
        }
        let bits = identifier.strip_prefix("AES-").or_else(|| identifier.strip_prefix("aes-"))?;
        match bits.parse().ok()? {
            key_size @ (128 | 192 | 256) => Some(Self::Aes { key_size }),
            _ => None,
        }
    }

    /// Block size in bits.
    pub fn block_size(&self) -> u32 {
        AES_BLOCK_BITS
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Identity => 0,
            Self::Aes { key_size } => *key_size as usize / 8,
        }
    }

    /// IV length in bytes.
    pub fn iv_len(&self) -> usize {
        match self {
            Self::Identity => 0,
            Self::Aes { .. } => (AES_BLOCK_BITS / 8) as usize,
        }
    }

    /// Fresh random key and IV sized for this algorithm.
    pub fn generate_key_package(&self) -> KeyPackage {
        let mut symmetric_key = vec![0u8; self.key_len()];
        let mut initialization_vector = vec![0u8; self.iv_len()];
        OsRng.fill_bytes(&mut symmetric_key);
        OsRng.fill_bytes(&mut initialization_vector);
        KeyPackage { symmetric_key, initialization_vector }
    }

    /// Encrypt transform keyed by `package`.
    pub fn encryptor(&self, package: &KeyPackage) -> Result<EncryptTransform, CryptoError> {
        self.check_package(package)?;
        EncryptTransform::new(*self, package)
    }

    /// Decrypt transform keyed by `package`.
    pub fn decryptor(&self, package: &KeyPackage) -> Result<DecryptTransform, CryptoError> {
        self.check_package(package)?;
        DecryptTransform::new(*self, package)
    }

    fn check_package(&self, package: &KeyPackage) -> Result<(), CryptoError> {
        if package.symmetric_key.len() != self.key_len() {
            return Err(CryptoError::InvalidKeyPackage(format!(
                "key is {} bytes, expected {}",
                package.symmetric_key.len(),
                self.key_len()
            )));
        }
        if package.initialization_vector.len() != self.iv_len() {
            return Err(CryptoError::InvalidKeyPackage(format!(
                "iv is {} bytes, expected {}",
                package.initialization_vector.len(),
                self.iv_len()
            )));
        }
        Ok(())
    }
}

impl Algorithm for SymmetricAlgorithm {
    fn descriptor(&self) -> AlgorithmDescriptor {
        match self {
            Self::Identity => AlgorithmDescriptor {
                identifier: "None".to_string(),
                key_size: 0,
                strength: 0,
                block_size: Some(AES_BLOCK_BITS),
            },
            Self::Aes { key_size } => AlgorithmDescriptor {
                identifier: format!("AES-{key_size}"),
                key_size: *key_size,
                strength: *key_size,
                block_size: Some(AES_BLOCK_BITS),
            },
        }
    }
}

/// Session key material for one direction of a link.
///
/// Generated fresh per connection, consumed to build a transform, zeroized
/// on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackage {
    /// Symmetric key
    #[serde(with = "serde_bytes")]
    pub symmetric_key: Vec<u8>,
    /// Initialization vector
    #[serde(with = "serde_bytes")]
    pub initialization_vector: Vec<u8>,
}

impl std::fmt::Debug for KeyPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPackage")
            .field("symmetric_key", &format_args!("[{} bytes]", self.symmetric_key.len()))
            .field("initialization_vector", &format_args!("[{} bytes]", self.initialization_vector.len()))
            .finish()
    }
}

impl Drop for KeyPackage {
    fn drop(&mut self) {
        self.symmetric_key.zeroize();
        self.initialization_vector.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_sizes_follow_algorithm() {
        let package = SymmetricAlgorithm::AES_192.generate_key_package();
        assert_eq!(package.symmetric_key.len(), 24);
        assert_eq!(package.initialization_vector.len(), 16);

        let none = SymmetricAlgorithm::Identity.generate_key_package();
        assert!(none.symmetric_key.is_empty());
    }

    #[test]
    fn packages_are_random() {
        let a = SymmetricAlgorithm::AES_256.generate_key_package();
        let b = SymmetricAlgorithm::AES_256.generate_key_package();
        assert_ne!(a, b);
    }

    #[test]
    fn mismatched_package_is_rejected() {
        let package = SymmetricAlgorithm::AES_128.generate_key_package();
        let result = SymmetricAlgorithm::AES_256.encryptor(&package);
        assert!(matches!(result, Err(CryptoError::InvalidKeyPackage(_))));
    }

    #[test]
    fn debug_does_not_leak_key() {
        let package = SymmetricAlgorithm::AES_128.generate_key_package();
        let rendered = format!("{package:?}");
        assert!(rendered.contains("[16 bytes]"));
    }

    #[test]
    fn identifiers_parse() {
        assert_eq!(SymmetricAlgorithm::from_identifier("AES-256"), Some(SymmetricAlgorithm::AES_256));
        assert_eq!(SymmetricAlgorithm::from_identifier("none"), Some(SymmetricAlgorithm::Identity));
        assert_eq!(SymmetricAlgorithm::from_identifier("AES-512"), None);
    }
}
