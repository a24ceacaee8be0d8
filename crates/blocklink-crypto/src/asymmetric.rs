//! Chunked RSA key exchange.
//!
//! An RSA operation can only carry a payload strictly smaller than the
//! modulus. Offer lists and key packages are larger than that for small
//! keys, so payloads are split into maximal chunks and each chunk is
//! encrypted into exactly one modulus-sized block.
//!
//! ```text
//! plaintext:  [  k - 11  ][  k - 11  ][ rest ]
//!                  │           │         │
//! ciphertext: [    k     ][    k     ][  k   ]
//! ```
//!
//! Decryption walks the ciphertext in modulus-sized blocks. The final
//! plaintext chunk is shorter and is recovered by its decrypted length.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use rand::rngs::OsRng;
use rsa::{
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding},
    traits::PublicKeyParts,
};
use tempfile::NamedTempFile;

use crate::{error::CryptoError, key_exchange::KeyLifetime};

/// Bytes of PKCS#1 v1.5 padding overhead per RSA block.
pub const PKCS1_OVERHEAD: usize = 11;

/// RSA key pair plus the peer's public key.
///
/// # Invariants
///
/// - `encrypt` uses the peer key and fails until [`Self::set_public_key`]
///   has been called.
/// - `decrypt` uses the local private key and fails until
///   [`Self::generate_keys`] has been called.
pub struct RsaKeyExchange {
    key_size: usize,
    lifetime: KeyLifetime,
    private_key: Option<RsaPrivateKey>,
    remote_key: Option<RsaPublicKey>,
}

impl RsaKeyExchange {
    /// Key exchange for `key_size`-bit keys. No keys exist until
    /// [`Self::generate_keys`].
    pub fn new(key_size: usize, lifetime: KeyLifetime) -> Self {
        Self { key_size, lifetime, private_key: None, remote_key: None }
    }

    /// Configured key size in bits.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Create the local key pair, or load it when the lifetime is
    /// [`KeyLifetime::Persisted`].
    pub fn generate_keys(&mut self) -> Result<(), CryptoError> {
        let key = match &self.lifetime {
            KeyLifetime::Ephemeral => generate(self.key_size)?,
            KeyLifetime::Persisted(path) => load_or_create(path, self.key_size)?,
        };

        tracing::trace!(bits = self.key_size, "rsa key pair ready");
        self.private_key = Some(key);
        Ok(())
    }

    /// Forget the peer key and regenerate (or reload) the local pair.
    pub fn reset(&mut self) -> Result<(), CryptoError> {
        self.remote_key = None;
        self.generate_keys()
    }

    /// Local public key as PKCS#1 PEM text.
    pub fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let key = self.private_key.as_ref().ok_or(CryptoError::MissingPrivateKey)?;
        let pem = key
            .to_public_key()
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(pem.into_bytes())
    }

    /// Import the peer public key from PKCS#1 PEM text.
    pub fn set_public_key(&mut self, pem: &[u8]) -> Result<(), CryptoError> {
        let text = std::str::from_utf8(pem)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("not utf-8: {e}")))?;
        let key = RsaPublicKey::from_pkcs1_pem(text)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        self.remote_key = Some(key);
        Ok(())
    }

    /// Largest plaintext chunk one RSA block can carry toward the peer.
    pub fn max_chunk_len(&self) -> Option<usize> {
        self.remote_key.as_ref().map(|key| key.size().saturating_sub(PKCS1_OVERHEAD))
    }

    /// Encrypt `data` for the peer, chunking as needed.
    ///
    /// Output length is `ceil(len / max_chunk_len) * modulus_bytes`.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.remote_key.as_ref().ok_or(CryptoError::MissingPublicKey)?;
        let block = key.size();
        let chunk_len = block.saturating_sub(PKCS1_OVERHEAD);
        if chunk_len == 0 {
            return Err(CryptoError::UnsupportedKeySize {
                algorithm: "RSA".to_string(),
                key_size: (block * 8) as u32,
            });
        }

        let mut out = Vec::with_capacity(data.len().div_ceil(chunk_len) * block);
        let mut rng = OsRng;
        for chunk in data.chunks(chunk_len) {
            let encrypted = key.encrypt(&mut rng, Pkcs1v15Encrypt, chunk)?;
            debug_assert_eq!(encrypted.len(), block);
            out.extend_from_slice(&encrypted);
        }

        Ok(out)
    }

    /// Decrypt ciphertext produced by the peer's [`Self::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.private_key.as_ref().ok_or(CryptoError::MissingPrivateKey)?;
        let block = key.size();

        if data.len() % block != 0 {
            return Err(CryptoError::InvalidCiphertextLength { len: data.len(), block });
        }

        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks_exact(block) {
            let plain = key.decrypt(Pkcs1v15Encrypt, chunk)?;
            out.extend_from_slice(&plain);
        }

        Ok(out)
    }
}

fn generate(bits: usize) -> Result<RsaPrivateKey, CryptoError> {
    let mut rng = OsRng;
    RsaPrivateKey::new(&mut rng, bits).map_err(|e| CryptoError::KeyGeneration(e.to_string()))
}

/// Load the PEM key at `path`, creating it on first use.
///
/// A new key is written to an owner-only temp file beside `path` and linked
/// into place without overwriting. When several callers race on first use,
/// one key wins and the others load it.
fn load_or_create(path: &Path, bits: usize) -> Result<RsaPrivateKey, CryptoError> {
    if path.exists() {
        return load(path, bits);
    }

    let key = generate(bits)?;
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyStorage(e.to_string()))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| storage_error(dir, &e))?;
    staged.write_all(pem.as_bytes()).map_err(|e| storage_error(staged.path(), &e))?;
    staged.as_file().sync_all().map_err(|e| storage_error(staged.path(), &e))?;

    match staged.persist_noclobber(path) {
        Ok(_) => {
            tracing::info!(path = %path.display(), bits, "persisted new rsa key");
            Ok(key)
        },
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!(path = %path.display(), "rsa key created concurrently, loading it");
            load(path, bits)
        },
        Err(e) => Err(storage_error(path, &e.error)),
    }
}

fn load(path: &Path, bits: usize) -> Result<RsaPrivateKey, CryptoError> {
    let pem = fs::read_to_string(path).map_err(|e| storage_error(path, &e))?;
    let key = RsaPrivateKey::from_pkcs1_pem(&pem)
        .map_err(|e| CryptoError::KeyStorage(format!("{}: {e}", path.display())))?;

    let actual = key.size() * 8;
    if actual != bits {
        return Err(CryptoError::KeySizeMismatch { expected: bits, actual });
    }
    Ok(key)
}

fn storage_error(path: &Path, e: &io::Error) -> CryptoError {
    CryptoError::KeyStorage(format!("{}: {e}", path.display()))
}
