//! TCP stub: one socket plus its negotiated transforms.
//!
//! A stub only exists after a successful handshake. The listener hands out
//! [`PendingStub`]s whose single operation is
//! [`PendingStub::negotiate_transport_keys`], so nothing can read or write
//! frames on a link that has not agreed on keys.

use std::{net::SocketAddr, sync::Arc};

use blocklink_crypto::AlgorithmDescriptor;
use tokio::net::{
    TcpStream, ToSocketAddrs,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{
    config::LinkConfig,
    error::{FrameError, HandshakeError},
    frame::{FrameReader, FrameWriter, ReadOutcome, SharedSerializer},
    negotiator::{LinkNegotiator, NegotiatedSession},
};

/// Reading half of a TCP stub.
pub type StubReader<M> = FrameReader<OwnedReadHalf, M>;

/// Writing half of a TCP stub.
pub type StubWriter<M> = FrameWriter<OwnedWriteHalf, M>;

/// What was agreed during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Remote address
    pub peer: SocketAddr,
    /// Selected key-exchange algorithm
    pub key_exchange: AlgorithmDescriptor,
    /// Selected symmetric algorithm
    pub symmetric: AlgorithmDescriptor,
    /// Frame block size in bytes
    pub block_size: usize,
}

/// Accepted or connected socket that has not negotiated yet.
pub struct PendingStub<M> {
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<LinkConfig>,
    serializer: SharedSerializer<M>,
}

impl<M: 'static> PendingStub<M> {
    /// Wrap `stream`. Fails only if the peer address is unavailable.
    pub fn new(
        stream: TcpStream,
        config: Arc<LinkConfig>,
        serializer: SharedSerializer<M>,
    ) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer, config, serializer })
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Run the handshake and return the ready stub.
    pub async fn negotiate_transport_keys(mut self) -> Result<CryptoStub<M>, HandshakeError> {
        if let Err(e) = self.stream.set_nodelay(true) {
            tracing::trace!(error = %e, "failed to disable nagle");
        }

        let session = LinkNegotiator::new(&self.config).negotiate(&mut self.stream).await?;
        tracing::debug!(
            peer = %self.peer,
            key_exchange = %session.key_exchange.identifier,
            symmetric = %session.symmetric.identifier,
            "link negotiated"
        );

        Ok(CryptoStub::from_parts(self.stream, self.peer, session, &self.config, self.serializer))
    }
}

/// Negotiated, framed TCP link.
pub struct CryptoStub<M> {
    reader: StubReader<M>,
    writer: StubWriter<M>,
    info: LinkInfo,
}

impl<M: 'static> CryptoStub<M> {
    /// Connect to `addr` and negotiate.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: Arc<LinkConfig>,
        serializer: SharedSerializer<M>,
    ) -> Result<Self, HandshakeError> {
        let stream = TcpStream::connect(addr).await?;
        PendingStub::new(stream, config, serializer)?.negotiate_transport_keys().await
    }

    fn from_parts(
        stream: TcpStream,
        peer: SocketAddr,
        session: NegotiatedSession,
        config: &LinkConfig,
        serializer: SharedSerializer<M>,
    ) -> Self {
        let NegotiatedSession { encrypt, decrypt, block_size, key_exchange, symmetric } = session;
        let (read_half, write_half) = stream.into_split();

        Self {
            reader: FrameReader::new(read_half, decrypt, block_size, config.max_frame_size, serializer.clone()),
            writer: FrameWriter::new(write_half, encrypt, block_size, config.max_frame_size, serializer),
            info: LinkInfo { peer, key_exchange, symmetric, block_size },
        }
    }

    /// What was agreed during the handshake.
    pub fn info(&self) -> &LinkInfo {
        &self.info
    }

    /// Whether the link can still read and write.
    pub fn is_open(&self) -> bool {
        self.reader.is_open() && self.writer.is_open()
    }

    /// Write one message. Returns the bytes put on the wire.
    pub async fn write(&mut self, message: &M) -> Result<usize, FrameError> {
        self.writer.write(message).await
    }

    /// Write a zero-length frame.
    pub async fn write_empty(&mut self) -> Result<usize, FrameError> {
        self.writer.write_empty().await
    }

    /// Read the next frame.
    pub async fn read_next(&mut self) -> ReadOutcome<M> {
        self.reader.read_next().await
    }

    /// Shut the write side down. Idempotent.
    pub async fn close(&mut self) {
        self.writer.shutdown().await;
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (StubReader<M>, StubWriter<M>, LinkInfo) {
        (self.reader, self.writer, self.info)
    }
}
