//! Server end of one connection.

use std::sync::Arc;

use blocklink_core::{
    ByteCounters, ConnectionState, CryptoStub, FrameError, LinkInfo, Session, SessionConfig,
    SessionError, Subscriptions,
};
use blocklink_proto::{ClientId, Envelope};

/// Accepted, negotiated connection with a server-assigned identity.
///
/// Cheap to clone; clones share the session.
pub struct ServersideClient<M> {
    session: Session<M>,
}

impl<M> Clone for ServersideClient<M> {
    fn clone(&self) -> Self {
        Self { session: self.session.clone() }
    }
}

impl<M: Envelope> ServersideClient<M> {
    /// Assign a fresh identity, announce it and start reading.
    ///
    /// The identity frame is the first frame the client sees; nothing else
    /// can be written before the read loop starts.
    ///
    /// # Errors
    ///
    /// `FrameError` if the identity frame cannot be written. The stub is
    /// dropped and the socket closed.
    pub async fn establish(
        mut stub: CryptoStub<M>,
        subscriptions: Arc<Subscriptions<M>>,
        config: SessionConfig,
    ) -> Result<Self, FrameError> {
        let id = ClientId::random();
        let written = stub.write(&M::identity(id)).await?;

        let session = Session::start(id, stub, subscriptions, config);
        session.counters().record_sent(written);
        Ok(Self { session })
    }

    /// Server-assigned identity.
    pub fn id(&self) -> ClientId {
        self.session.id()
    }

    /// What was agreed during the handshake.
    pub fn info(&self) -> &LinkInfo {
        self.session.info()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Byte counters for this client.
    pub fn counters(&self) -> &ByteCounters {
        self.session.counters()
    }

    /// Send one message to this client.
    pub async fn send(&self, message: &M) -> Result<usize, SessionError> {
        self.session.send(message).await
    }

    /// Close the connection. Idempotent.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Resolves once the connection has closed, by either side.
    pub async fn closed(&self) {
        self.session.closed().await;
    }
}
