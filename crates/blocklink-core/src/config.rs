//! Link and session configuration.

use std::time::Duration;

use blocklink_crypto::{AlgorithmContainer, KeyExchangeAlgorithm, KeyLifetime, SymmetricAlgorithm};

/// Time allowed to complete the whole handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest single handshake field (offer record, public key, key package).
pub const DEFAULT_MAX_HANDSHAKE_FIELD: usize = 64 * 1024;

/// Largest serialized message carried by one frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Granularity of the read loop's retry and shutdown waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Algorithms and limits used to establish a link.
///
/// Shared by every handshake a process runs, typically behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Key-exchange algorithms offered during negotiation
    pub key_exchange: AlgorithmContainer<KeyExchangeAlgorithm>,
    /// Symmetric algorithms offered during negotiation
    pub symmetric: AlgorithmContainer<SymmetricAlgorithm>,
    /// Where RSA key pairs come from
    pub key_lifetime: KeyLifetime,
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
    /// Largest handshake field accepted from the peer
    pub max_handshake_field: usize,
    /// Largest frame payload accepted or sent
    pub max_frame_size: usize,
}

impl Default for LinkConfig {
    /// RSA-1024/2048 with AES-128/192/256 and ephemeral keys.
    fn default() -> Self {
        Self::with_algorithms(
            [KeyExchangeAlgorithm::RSA_1024, KeyExchangeAlgorithm::RSA_2048],
            [SymmetricAlgorithm::AES_128, SymmetricAlgorithm::AES_192, SymmetricAlgorithm::AES_256],
        )
    }
}

impl LinkConfig {
    /// Configuration offering exactly the given algorithms.
    pub fn with_algorithms(
        key_exchange: impl IntoIterator<Item = KeyExchangeAlgorithm>,
        symmetric: impl IntoIterator<Item = SymmetricAlgorithm>,
    ) -> Self {
        Self {
            key_exchange: key_exchange.into_iter().collect(),
            symmetric: symmetric.into_iter().collect(),
            key_lifetime: KeyLifetime::Ephemeral,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_handshake_field: DEFAULT_MAX_HANDSHAKE_FIELD,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Identity key exchange and identity block transform.
    ///
    /// Frames keep the same block layout; they are just not encrypted.
    pub fn unencrypted() -> Self {
        Self::with_algorithms([KeyExchangeAlgorithm::Identity], [SymmetricAlgorithm::Identity])
    }

    /// Same configuration with a different key lifetime.
    #[must_use]
    pub fn with_key_lifetime(mut self, key_lifetime: KeyLifetime) -> Self {
        self.key_lifetime = key_lifetime;
        self
    }
}

/// Per-connection session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Back-off before retrying a transient read error
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL }
    }
}

impl SessionConfig {
    /// Bounded wait for the read loop to stop after `close`. The loop is
    /// aborted once this elapses.
    pub fn close_timeout(&self) -> Duration {
        self.poll_interval * 5
    }
}
