//! Stateful block transforms for steady-state frames.
//!
//! Each transform owns one direction of a link. CBC chaining state carries
//! over from one call to the next, so the transform must see every frame of
//! its direction, in wire order, exactly once.

use std::fmt;

use aes::cipher::{
    BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit, consts::U16,
    generic_array::GenericArray,
};

use crate::{error::CryptoError, symmetric::SymmetricAlgorithm, KeyPackage};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes.
const BLOCK: usize = 16;

/// Encrypting direction of a link.
pub enum EncryptTransform {
    /// No encryption
    Identity,
    /// AES-128-CBC
    Aes128(Box<Aes128CbcEnc>),
    /// AES-192-CBC
    Aes192(Box<Aes192CbcEnc>),
    /// AES-256-CBC
    Aes256(Box<Aes256CbcEnc>),
}

impl EncryptTransform {
    pub(crate) fn new(algorithm: SymmetricAlgorithm, package: &KeyPackage) -> Result<Self, CryptoError> {
        let key = &package.symmetric_key;
        let iv = &package.initialization_vector;
        let invalid = |e: aes::cipher::InvalidLength| CryptoError::InvalidKeyPackage(e.to_string());

        Ok(match algorithm {
            SymmetricAlgorithm::Identity => Self::Identity,
            SymmetricAlgorithm::Aes { key_size: 128 } => {
                Self::Aes128(Box::new(Aes128CbcEnc::new_from_slices(key, iv).map_err(invalid)?))
            },
            SymmetricAlgorithm::Aes { key_size: 192 } => {
                Self::Aes192(Box::new(Aes192CbcEnc::new_from_slices(key, iv).map_err(invalid)?))
            },
            SymmetricAlgorithm::Aes { key_size: 256 } => {
                Self::Aes256(Box::new(Aes256CbcEnc::new_from_slices(key, iv).map_err(invalid)?))
            },
            SymmetricAlgorithm::Aes { key_size } => {
                return Err(CryptoError::UnsupportedKeySize { algorithm: "AES".to_string(), key_size });
            },
        })
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        BLOCK
    }

    /// Encrypt `buf` in place. `buf` must be block aligned.
    pub fn apply(&mut self, buf: &mut [u8]) -> Result<(), CryptoError> {
        check_aligned(buf)?;
        match self {
            Self::Identity => {},
            Self::Aes128(cipher) => encrypt_blocks(cipher.as_mut(), buf),
            Self::Aes192(cipher) => encrypt_blocks(cipher.as_mut(), buf),
            Self::Aes256(cipher) => encrypt_blocks(cipher.as_mut(), buf),
        }
        Ok(())
    }
}

/// Decrypting direction of a link.
pub enum DecryptTransform {
    /// No encryption
    Identity,
    /// AES-128-CBC
    Aes128(Box<Aes128CbcDec>),
    /// AES-192-CBC
    Aes192(Box<Aes192CbcDec>),
    /// AES-256-CBC
    Aes256(Box<Aes256CbcDec>),
}

impl DecryptTransform {
    pub(crate) fn new(algorithm: SymmetricAlgorithm, package: &KeyPackage) -> Result<Self, CryptoError> {
        let key = &package.symmetric_key;
        let iv = &package.initialization_vector;
        let invalid = |e: aes::cipher::InvalidLength| CryptoError::InvalidKeyPackage(e.to_string());

        Ok(match algorithm {
            SymmetricAlgorithm::Identity => Self::Identity,
            SymmetricAlgorithm::Aes { key_size: 128 } => {
                Self::Aes128(Box::new(Aes128CbcDec::new_from_slices(key, iv).map_err(invalid)?))
            },
            SymmetricAlgorithm::Aes { key_size: 192 } => {
                Self::Aes192(Box::new(Aes192CbcDec::new_from_slices(key, iv).map_err(invalid)?))
            },
            SymmetricAlgorithm::Aes { key_size: 256 } => {
                Self::Aes256(Box::new(Aes256CbcDec::new_from_slices(key, iv).map_err(invalid)?))
            },
            SymmetricAlgorithm::Aes { key_size } => {
                return Err(CryptoError::UnsupportedKeySize { algorithm: "AES".to_string(), key_size });
            },
        })
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        BLOCK
    }

    /// Decrypt `buf` in place. `buf` must be block aligned.
    pub fn apply(&mut self, buf: &mut [u8]) -> Result<(), CryptoError> {
        check_aligned(buf)?;
        match self {
            Self::Identity => {},
            Self::Aes128(cipher) => decrypt_blocks(cipher.as_mut(), buf),
            Self::Aes192(cipher) => decrypt_blocks(cipher.as_mut(), buf),
            Self::Aes256(cipher) => decrypt_blocks(cipher.as_mut(), buf),
        }
        Ok(())
    }
}

impl fmt::Debug for EncryptTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "EncryptTransform::Identity",
            Self::Aes128(_) => "EncryptTransform::Aes128",
            Self::Aes192(_) => "EncryptTransform::Aes192",
            Self::Aes256(_) => "EncryptTransform::Aes256",
        })
    }
}

impl fmt::Debug for DecryptTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "DecryptTransform::Identity",
            Self::Aes128(_) => "DecryptTransform::Aes128",
            Self::Aes192(_) => "DecryptTransform::Aes192",
            Self::Aes256(_) => "DecryptTransform::Aes256",
        })
    }
}

fn check_aligned(buf: &[u8]) -> Result<(), CryptoError> {
    if buf.len() % BLOCK == 0 {
        Ok(())
    } else {
        Err(CryptoError::UnalignedBuffer { len: buf.len(), block: BLOCK })
    }
}

fn encrypt_blocks<C>(cipher: &mut C, buf: &mut [u8])
where
    C: BlockEncryptMut + BlockSizeUser<BlockSize = U16>,
{
    for chunk in buf.chunks_exact_mut(BLOCK) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
}

fn decrypt_blocks<C>(cipher: &mut C, buf: &mut [u8])
where
    C: BlockDecryptMut + BlockSizeUser<BlockSize = U16>,
{
    for chunk in buf.chunks_exact_mut(BLOCK) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(algorithm: SymmetricAlgorithm) -> (EncryptTransform, DecryptTransform) {
        let package = algorithm.generate_key_package();
        (algorithm.encryptor(&package).unwrap(), algorithm.decryptor(&package).unwrap())
    }

    #[test]
    fn aes_round_trip_across_calls() {
        for algorithm in [SymmetricAlgorithm::AES_128, SymmetricAlgorithm::AES_192, SymmetricAlgorithm::AES_256] {
            let (mut enc, mut dec) = pair(algorithm);

            // Chaining state must carry over between frames
            let frames: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 32]).collect();
            for frame in &frames {
                let mut buf = frame.clone();
                enc.apply(&mut buf).unwrap();
                assert_ne!(&buf, frame);
                dec.apply(&mut buf).unwrap();
                assert_eq!(&buf, frame);
            }
        }
    }

    #[test]
    fn identical_frames_encrypt_differently() {
        let (mut enc, _) = pair(SymmetricAlgorithm::AES_256);

        let mut first = vec![7u8; 16];
        let mut second = vec![7u8; 16];
        enc.apply(&mut first).unwrap();
        enc.apply(&mut second).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn unaligned_buffer_is_rejected() {
        let (mut enc, mut dec) = pair(SymmetricAlgorithm::AES_128);
        let mut buf = vec![0u8; 17];

        assert_eq!(enc.apply(&mut buf), Err(CryptoError::UnalignedBuffer { len: 17, block: 16 }));
        assert_eq!(dec.apply(&mut buf), Err(CryptoError::UnalignedBuffer { len: 17, block: 16 }));
    }

    #[test]
    fn identity_passes_through() {
        let (mut enc, mut dec) = pair(SymmetricAlgorithm::Identity);
        let mut buf = b"sixteen bytes!!!".to_vec();

        enc.apply(&mut buf).unwrap();
        assert_eq!(&buf, b"sixteen bytes!!!");
        dec.apply(&mut buf).unwrap();
        assert_eq!(&buf, b"sixteen bytes!!!");
    }

    #[test]
    fn unsupported_key_size_is_rejected() {
        let package = KeyPackage { symmetric_key: vec![0; 8], initialization_vector: vec![0; 16] };
        let result = EncryptTransform::new(SymmetricAlgorithm::Aes { key_size: 64 }, &package);
        assert!(matches!(result, Err(CryptoError::UnsupportedKeySize { key_size: 64, .. })));
    }
}
