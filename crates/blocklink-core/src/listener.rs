//! Listening socket that hands out stubs.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::net::{TcpListener, ToSocketAddrs};

use crate::{
    config::LinkConfig,
    error::HandshakeError,
    frame::SharedSerializer,
    stub::{CryptoStub, PendingStub},
};

/// TCP listener producing negotiated stubs.
pub struct CryptoListener<M> {
    listener: TcpListener,
    config: Arc<LinkConfig>,
    serializer: SharedSerializer<M>,
}

impl<M: 'static> CryptoListener<M> {
    /// Bind to `addr`.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: Arc<LinkConfig>,
        serializer: SharedSerializer<M>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config, serializer })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one socket without negotiating.
    ///
    /// Lets the caller run the handshake on another task so a slow peer does
    /// not hold up the accept loop.
    pub async fn accept_raw(&self) -> io::Result<PendingStub<M>> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::trace!(%peer, "accepted socket");
        PendingStub::new(stream, Arc::clone(&self.config), Arc::clone(&self.serializer))
    }

    /// Accept one socket and negotiate before returning it.
    pub async fn accept_next(&self) -> Result<CryptoStub<M>, HandshakeError> {
        self.accept_raw().await?.negotiate_transport_keys().await
    }
}
