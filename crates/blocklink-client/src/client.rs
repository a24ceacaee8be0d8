//! Connecting client.
//!
//! Owns the subscriptions for its whole lifetime and at most one live
//! connection at a time. Subscribers registered before `connect` see every
//! message of every connection the client makes.
//!
//! # States
//!
//! ```text
//! Disconnected ── connect ──> Connecting ── identity frame ──> Connected
//!       ↑                         │                               │
//!       └──── handshake error ────┘          close / disconnect / peer closed
//!                                                                 ↓
//!                                                              Closed
//! ```
//!
//! `connect` may be called again once the previous session is closed.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use blocklink_core::{
    ConnectionState, CryptoStub, Delivery, HandshakeError, LinkConfig, ReadOutcome, Session,
    SessionConfig, SessionError, SharedSerializer, SubscriptionId, Subscriptions,
};
use blocklink_proto::{ClientId, Envelope, MessageKey};
use tokio::net::ToSocketAddrs;

use crate::{
    connection::StubConnection,
    error::{ClientError, RequestError},
};

enum Slot<M> {
    Idle,
    Connecting,
    Active(StubConnection<M>),
}

/// Holds the slot in `Connecting` until `complete`; resets it to `Idle` on
/// drop, which also covers a cancelled `connect`.
struct ConnectingGuard<'a, M> {
    slot: &'a Mutex<Slot<M>>,
    armed: bool,
}

impl<M> ConnectingGuard<'_, M> {
    fn complete(mut self, connection: StubConnection<M>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Active(connection);
        self.armed = false;
    }
}

impl<M> Drop for ConnectingGuard<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*slot, Slot::Connecting) {
                *slot = Slot::Idle;
            }
        }
    }
}

/// Client end of a blocklink connection.
pub struct Client<M> {
    link: Arc<LinkConfig>,
    session_config: SessionConfig,
    serializer: SharedSerializer<M>,
    subscriptions: Arc<Subscriptions<M>>,
    slot: Mutex<Slot<M>>,
}

impl<M: Envelope> Client<M> {
    /// Client that negotiates with `link` and encodes with `serializer`.
    pub fn new(link: Arc<LinkConfig>, serializer: SharedSerializer<M>) -> Self {
        Self {
            link,
            session_config: SessionConfig::default(),
            serializer,
            subscriptions: Arc::new(Subscriptions::new()),
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Same client with different session tuning.
    #[must_use]
    pub fn with_session_config(mut self, session_config: SessionConfig) -> Self {
        self.session_config = session_config;
        self
    }

    /// Call `handler` for every received message with `key`.
    pub fn subscribe<F>(&self, key: MessageKey, handler: F) -> SubscriptionId
    where
        F: Fn(&M, Delivery) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(key, handler)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Number of handlers registered for `key`, temporary request
    /// subscriptions included.
    pub fn subscriber_count(&self, key: MessageKey) -> usize {
        self.subscriptions.subscriber_count(key)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match &*self.lock_slot() {
            Slot::Idle => ConnectionState::Disconnected,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Active(connection) => connection.session().state(),
        }
    }

    /// Identity assigned by the server, while a session exists.
    pub fn id(&self) -> Option<ClientId> {
        self.connection().map(|c| c.id())
    }

    /// Handle to the current connection.
    pub fn connection(&self) -> Option<StubConnection<M>> {
        match &*self.lock_slot() {
            Slot::Active(connection) => Some(connection.clone()),
            Slot::Idle | Slot::Connecting => None,
        }
    }

    /// Bytes sent over the current connection.
    pub fn sent_bytes(&self) -> u64 {
        self.connection().map_or(0, |c| c.counters().sent())
    }

    /// Bytes received over the current connection.
    pub fn received_bytes(&self) -> u64 {
        self.connection().map_or(0, |c| c.counters().received())
    }

    /// Connect, negotiate, read the identity frame and start reading.
    ///
    /// # Errors
    ///
    /// - `ClientError::AlreadyConnected`/`Connecting` if a connection is
    ///   live or in flight
    /// - `ClientError::Handshake` if negotiation fails or times out
    /// - `ClientError::MissingIdentity` if the server's first frame is not
    ///   an identity frame
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> Result<ClientId, ClientError> {
        {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Connecting => return Err(ClientError::Connecting),
                Slot::Active(connection) if connection.session().is_connected() => {
                    return Err(ClientError::AlreadyConnected);
                },
                Slot::Idle | Slot::Active(_) => *slot = Slot::Connecting,
            }
        }

        let pending = ConnectingGuard { slot: &self.slot, armed: true };
        match self.establish(addr).await {
            Ok(connection) => {
                let id = connection.id();
                pending.complete(connection);
                Ok(id)
            },
            Err(e) => {
                drop(pending);
                tracing::warn!(error = %e, "connect failed");
                Err(e)
            },
        }
    }

    async fn establish(&self, addr: impl ToSocketAddrs) -> Result<StubConnection<M>, ClientError> {
        let started = Instant::now();
        let mut stub =
            CryptoStub::connect(addr, Arc::clone(&self.link), Arc::clone(&self.serializer)).await?;
        let peer: SocketAddr = stub.info().peer;

        let remaining = self.link.handshake_timeout.saturating_sub(started.elapsed());
        let first = tokio::time::timeout(remaining, stub.read_next())
            .await
            .map_err(|_| HandshakeError::Timeout { elapsed: started.elapsed() })?;

        let (id, size) = match first {
            ReadOutcome::Message { message, size } => {
                (message.assigned_identity().ok_or(ClientError::MissingIdentity)?, size)
            },
            ReadOutcome::Empty { .. } | ReadOutcome::Closed => return Err(ClientError::MissingIdentity),
            ReadOutcome::Error(e) => return Err(e.into()),
        };

        let session = Session::start(id, stub, Arc::clone(&self.subscriptions), self.session_config);
        session.counters().record_received(size);
        tracing::info!(client = %id, %peer, "connected");

        Ok(StubConnection::new(session, Arc::clone(&self.subscriptions)))
    }

    /// Send one message on the current connection.
    pub async fn send(&self, message: &M) -> Result<usize, ClientError> {
        let connection = self.connection().ok_or(ClientError::NotConnected)?;
        connection.send(message).await.map_err(|e| match e {
            SessionError::NotConnected => ClientError::NotConnected,
            other => other.into(),
        })
    }

    /// Send `message` and wait for the first message with `response_key`.
    pub async fn request(
        &self,
        message: &M,
        response_key: MessageKey,
        timeout: Duration,
    ) -> Result<M, RequestError>
    where
        M: Clone,
    {
        let connection = self.connection().ok_or(RequestError::Disconnected)?;
        connection.request(message, response_key, timeout).await
    }

    /// Best-effort `exit_message`, then close.
    pub async fn disconnect(&self, exit_message: &M) {
        if let Some(connection) = self.connection() {
            connection.session().disconnect(exit_message).await;
        }
    }

    /// Close the current connection, if any. Idempotent.
    ///
    /// The closed session stays in place so [`Self::state`] reports
    /// `Closed` until the next `connect`.
    pub async fn close(&self) {
        if let Some(connection) = self.connection() {
            connection.session().close().await;
        }
    }

    /// Resolves once the current connection has closed. Returns immediately
    /// when there is none.
    pub async fn closed(&self) {
        if let Some(connection) = self.connection() {
            connection.session().closed().await;
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot<M>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
