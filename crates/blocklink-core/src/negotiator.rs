//! Link handshake.
//!
//! Runs once per connection on the raw stream, before any frame is sent.
//! Each step writes first and then reads, so both ends can drive the same
//! code without deciding who speaks first.
//!
//! # State Machine
//!
//! ```text
//! ┌───────┐ key-exchange offers ┌──────────────────────────────┐ public keys
//! │ Start │────────────────────>│ ExchangedKeyExchangeAlgorithm│────────┐
//! └───────┘   (identity)        └──────────────────────────────┘        │
//!                                                                        ↓
//! ┌───────┐  transforms   ┌───────────────┐  key packages  ┌────────────────────┐
//! │ Ready │<──────────────│ KeysExchanged │<───────────────│ ExchangedOfferLists│
//! └───────┘               └───────────────┘   (protected)  └────────────────────┘
//!
//! Any error moves to Failed.
//! ```
//!
//! # Wire Format
//!
//! Every field is `[i32 BE length][payload]`, the payload protected by the
//! key exchange active at that point. Offer lists are `[i32 BE count]`
//! followed by one field per record. Records and key packages are CBOR.

use std::time::Instant;

use blocklink_crypto::{
    Algorithm, AlgorithmDescriptor, DecryptTransform, EncryptTransform, KeyExchange,
    KeyExchangeAlgorithm, KeyPackage,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{config::LinkConfig, error::HandshakeError, frame::LENGTH_PREFIX};

/// Upper bound on records in one offer list.
const MAX_OFFER_RECORDS: usize = 256;

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing exchanged yet
    Start,
    /// Key exchange selected
    ExchangedKeyExchangeAlgorithm,
    /// Public keys exchanged and symmetric algorithm selected
    ExchangedOfferLists,
    /// Session key packages exchanged
    KeysExchanged,
    /// Transforms built
    Ready,
    /// Handshake failed; the stream must be dropped
    Failed,
}

/// Result of a successful handshake. Owned by exactly one stub.
#[derive(Debug)]
pub struct NegotiatedSession {
    /// Transform for outbound frames, keyed by the local package
    pub encrypt: EncryptTransform,
    /// Transform for inbound frames, keyed by the peer's package
    pub decrypt: DecryptTransform,
    /// Frame block size in bytes
    pub block_size: usize,
    /// Selected key-exchange algorithm
    pub key_exchange: AlgorithmDescriptor,
    /// Selected symmetric algorithm
    pub symmetric: AlgorithmDescriptor,
}

/// Drives the handshake for one connection.
#[derive(Debug)]
pub struct LinkNegotiator<'a> {
    config: &'a LinkConfig,
    state: NegotiationState,
}

impl<'a> LinkNegotiator<'a> {
    /// Negotiator for one handshake using `config`.
    pub fn new(config: &'a LinkConfig) -> Self {
        Self { config, state: NegotiationState::Start }
    }

    /// Current state.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Run the whole handshake over `stream`.
    ///
    /// # Errors
    ///
    /// - `HandshakeError::Timeout` if it does not finish within
    ///   `handshake_timeout`
    /// - `HandshakeError::NoCommonAlgorithm` if the offers are disjoint
    /// - `HandshakeError::NegativeLength`/`FieldTooLarge` for a malformed
    ///   peer
    pub async fn negotiate<S>(&mut self, stream: &mut S) -> Result<NegotiatedSession, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let limit = self.config.handshake_timeout;

        let result = match tokio::time::timeout(limit, self.run(stream)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout { elapsed: started.elapsed() }),
        };

        if result.is_err() {
            self.state = NegotiationState::Failed;
        }
        result
    }

    async fn run<S>(&mut self, stream: &mut S) -> Result<NegotiatedSession, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let max = self.config.max_handshake_field;

        // Bootstrap selection runs under the identity transform
        let bootstrap = KeyExchange::Identity;
        let local = self.config.key_exchange.supported_algorithms();
        write_offers(stream, &local, &bootstrap).await?;
        let remote = read_offers(stream, &bootstrap, max).await?;
        let kx_algorithm: KeyExchangeAlgorithm = self
            .config
            .key_exchange
            .select_strongest(&remote)
            .ok_or(HandshakeError::NoCommonAlgorithm { stage: "key exchange" })?;
        let key_exchange = kx_algorithm.descriptor();
        tracing::debug!(algorithm = %key_exchange, "key exchange selected");
        self.state = NegotiationState::ExchangedKeyExchangeAlgorithm;

        let mut kx = generate_keys(kx_algorithm.build(&self.config.key_lifetime)).await?;
        write_field(stream, &kx.public_key()?).await?;
        let peer_key = read_field(stream, max).await?;
        kx.set_public_key(&peer_key)?;

        let local = self.config.symmetric.supported_algorithms();
        write_offers(stream, &local, &kx).await?;
        let remote = read_offers(stream, &kx, max).await?;
        let sym_algorithm = self
            .config
            .symmetric
            .select_strongest(&remote)
            .ok_or(HandshakeError::NoCommonAlgorithm { stage: "symmetric" })?;
        let symmetric = sym_algorithm.descriptor();
        tracing::debug!(algorithm = %symmetric, "symmetric algorithm selected");
        self.state = NegotiationState::ExchangedOfferLists;

        let block_size = block_size_bytes(sym_algorithm.block_size())?;

        let local_package = sym_algorithm.generate_key_package();
        write_field(stream, &kx.encrypt(&encode(&local_package)?)?).await?;
        let peer_package: KeyPackage = decode(&kx.decrypt(&read_field(stream, max).await?)?)?;
        self.state = NegotiationState::KeysExchanged;

        let encrypt = sym_algorithm.encryptor(&local_package)?;
        let decrypt = sym_algorithm.decryptor(&peer_package)?;
        self.state = NegotiationState::Ready;

        Ok(NegotiatedSession { encrypt, decrypt, block_size, key_exchange, symmetric })
    }
}

/// Block size in bytes for a block size in bits.
///
/// A block must be able to hold the length prefix and at least one byte.
pub fn block_size_bytes(bits: u32) -> Result<usize, HandshakeError> {
    let bytes = (bits / 8) as usize;
    if bytes <= LENGTH_PREFIX {
        return Err(HandshakeError::BlockSizeTooSmall(bytes));
    }
    Ok(bytes)
}

/// RSA key generation is CPU-bound; keep it off the async workers.
async fn generate_keys(mut kx: KeyExchange) -> Result<KeyExchange, HandshakeError> {
    if matches!(kx, KeyExchange::Identity) {
        return Ok(kx);
    }

    tokio::task::spawn_blocking(move || kx.generate_keys().map(|()| kx))
        .await
        .map_err(|e| HandshakeError::Transport(format!("key generation task failed: {e}")))?
        .map_err(HandshakeError::from)
}

async fn write_offers<S>(
    stream: &mut S,
    offers: &[AlgorithmDescriptor],
    kx: &KeyExchange,
) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    write_i32(stream, offers.len()).await?;
    for offer in offers {
        let record = kx.encrypt(&encode(offer)?)?;
        write_field(stream, &record).await?;
    }
    Ok(())
}

async fn read_offers<S>(
    stream: &mut S,
    kx: &KeyExchange,
    max: usize,
) -> Result<Vec<AlgorithmDescriptor>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let count = read_length(stream, MAX_OFFER_RECORDS).await?;

    let mut offers = Vec::with_capacity(count);
    for _ in 0..count {
        let record = read_field(stream, max).await?;
        offers.push(decode(&kx.decrypt(&record)?)?);
    }
    Ok(offers)
}

async fn write_field<S>(stream: &mut S, payload: &[u8]) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    write_i32(stream, payload.len()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_field<S>(stream: &mut S, max: usize) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let len = read_length(stream, max).await?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_i32<S>(stream: &mut S, value: usize) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    let value = i32::try_from(value)
        .map_err(|_| HandshakeError::FieldTooLarge { len: value, max: i32::MAX as usize })?;
    stream.write_all(&value.to_be_bytes()).await?;
    Ok(())
}

/// Read a length or count and validate it against `max`.
async fn read_length<S>(stream: &mut S, max: usize) -> Result<usize, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let value = stream.read_i32().await?;
    let len = usize::try_from(value).map_err(|_| HandshakeError::NegativeLength(value))?;
    if len > max {
        return Err(HandshakeError::FieldTooLarge { len, max });
    }
    Ok(len)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, HandshakeError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| HandshakeError::Protocol(e.to_string()))?;
    Ok(buf)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, HandshakeError> {
    ciborium::from_reader(bytes).map_err(|e| HandshakeError::Protocol(e.to_string()))
}
