//! Message server.
//!
//! Accepts connections, hands every handshake to its own task, registers
//! each established client under a fresh identity and keeps the registry in
//! step with disconnections.
//!
//! # Tasks
//!
//! ```text
//! accept loop ──accept_raw──> admit task (negotiate, establish, register)
//!                                   │
//!                                   ↓
//!                            watcher task ── client closed ──> on_disconnected
//! ```
//!
//! The registry sits behind a reader/writer lock. Broadcasts copy the
//! registered handles under the read lock and send after releasing it, so a
//! slow client never blocks registration.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use blocklink_core::{
    CryptoListener, Delivery, LinkConfig, PendingStub, SharedSerializer, SubscriptionId,
    Subscriptions,
};
use blocklink_proto::{ClientId, Envelope, MessageKey};
use tokio::{
    sync::{broadcast, watch},
    task::{JoinHandle, JoinSet},
};

use crate::{
    config::ServerConfig, error::ServerError, registry::ClientRegistry,
    serverside::ServersideClient,
};

/// Connection lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// Client finished its handshake and was registered.
    ClientConnected {
        /// Assigned identity
        id: ClientId,
        /// Remote address
        peer: SocketAddr,
    },
    /// Client was removed from the registry.
    ClientDisconnected {
        /// Identity of the removed client
        id: ClientId,
    },
}

/// Requests that can be queued for the server from synchronous code, such as
/// subscription handlers.
#[derive(Debug, Clone)]
pub enum ServerCommand<M> {
    /// Close and remove a client.
    Disconnect(ClientId),
    /// Send to every connected client.
    Broadcast(M),
    /// Send to the listed clients that are still connected.
    SendTo {
        /// Message to send
        message: M,
        /// Recipients
        targets: Vec<ClientId>,
    },
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

struct Shared<M> {
    link: Arc<LinkConfig>,
    serializer: SharedSerializer<M>,
    config: ServerConfig,
    subscriptions: Arc<Subscriptions<M>>,
    registry: RwLock<ClientRegistry<ServersideClient<M>>>,
    events: broadcast::Sender<ServerEvent>,
    running: tokio::sync::Mutex<Option<Running>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Server side of a blocklink deployment.
///
/// Cheap to clone; clones control the same server.
pub struct MessageServer<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for MessageServer<M> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<M: Envelope> MessageServer<M> {
    /// Server that negotiates with `link` and encodes with `serializer`.
    ///
    /// Nothing is bound until [`Self::start`].
    pub fn new(link: Arc<LinkConfig>, serializer: SharedSerializer<M>, config: ServerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                link,
                serializer,
                config,
                subscriptions: Arc::new(Subscriptions::new()),
                registry: RwLock::new(ClientRegistry::new()),
                events,
                running: tokio::sync::Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Bind `addr` and start accepting. Returns the bound address.
    ///
    /// Calling it again while running returns the existing address without
    /// binding anything.
    ///
    /// # Errors
    ///
    /// `ServerError::Bind` if the address cannot be bound.
    pub async fn start(&self, addr: &str) -> Result<SocketAddr, ServerError> {
        let mut running = self.shared.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.local_addr);
        }

        let bind_err = |source| ServerError::Bind { addr: addr.to_string(), source };
        let listener =
            CryptoListener::bind(addr, Arc::clone(&self.shared.link), Arc::clone(&self.shared.serializer))
                .await
                .map_err(bind_err)?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(Arc::clone(&self.shared).accept_loop(listener, shutdown_rx));

        *running = Some(Running { local_addr, shutdown, accept_task });
        *self.shared.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        tracing::info!(%local_addr, "server listening");

        Ok(local_addr)
    }

    /// Stop accepting, wait for the accept loop and close every client.
    ///
    /// Handshakes still in flight are abandoned. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.shared.running.lock().await.take() else {
            return;
        };
        *self.shared.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;

        running.shutdown.send_replace(true);
        if let Err(e) = running.accept_task.await {
            tracing::warn!(error = %e, "accept loop ended abnormally");
        }

        let clients = self.shared.read_registry().snapshot();
        for client in clients {
            client.close().await;
            self.shared.on_disconnected(client.id()).await;
        }
        tracing::info!(local_addr = %running.local_addr, "server stopped");
    }

    /// Whether the server is accepting connections.
    pub async fn is_running(&self) -> bool {
        self.shared.running.lock().await.is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point-in-time copy of the registered identities.
    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.shared.read_registry().ids()
    }

    /// Handle for a registered client.
    pub fn client(&self, id: ClientId) -> Option<ServersideClient<M>> {
        self.shared.read_registry().get(id).cloned()
    }

    /// Receiver for connection lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    /// Call `handler` for every message with `key` from any client.
    ///
    /// [`Delivery::connection`] names the sender.
    pub fn subscribe<F>(&self, key: MessageKey, handler: F) -> SubscriptionId
    where
        F: Fn(&M, Delivery) + Send + Sync + 'static,
    {
        self.shared.subscriptions.subscribe(key, handler)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscriptions.unsubscribe(id)
    }

    /// Send `message` to every connected client.
    ///
    /// Runs on its own task; the handle resolves to the number of clients the
    /// message was written to.
    pub fn send_message(&self, message: M) -> JoinHandle<usize> {
        let clients = self.shared.read_registry().snapshot();
        tokio::spawn(deliver(message, clients))
    }

    /// Send `message` to the connected clients among `targets`.
    ///
    /// Unknown or already disconnected ids are skipped.
    pub fn send_message_to(
        &self,
        message: M,
        targets: impl IntoIterator<Item = ClientId>,
    ) -> JoinHandle<usize> {
        let clients = self.shared.read_registry().select(targets);
        tokio::spawn(deliver(message, clients))
    }

    /// Close and remove a client. Returns `false` if it was not registered.
    pub async fn disconnect(&self, id: ClientId) -> bool {
        let Some(client) = self.client(id) else {
            return false;
        };
        client.close().await;
        self.shared.on_disconnected(id).await;
        true
    }

    /// Carry out one queued command.
    pub async fn handle_command(&self, command: ServerCommand<M>) {
        let delivery = match command {
            ServerCommand::Disconnect(id) => {
                if !self.disconnect(id).await {
                    tracing::debug!(client = %id, "disconnect for unknown client");
                }
                return;
            },
            ServerCommand::Broadcast(message) => self.send_message(message),
            ServerCommand::SendTo { message, targets } => self.send_message_to(message, targets),
        };

        if let Err(e) = delivery.await {
            tracing::warn!(error = %e, "delivery task failed");
        }
    }
}

impl<M: Envelope> Shared<M> {
    async fn accept_loop(
        self: Arc<Self>,
        listener: CryptoListener<M>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut handshakes = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {},
                accepted = listener.accept_raw() => match accepted {
                    Ok(pending) => {
                        handshakes.spawn(Arc::clone(&self).admit(pending));
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(self.config.session.poll_interval).await;
                    },
                },
            }
        }

        handshakes.shutdown().await;
    }

    async fn admit(self: Arc<Self>, pending: PendingStub<M>) {
        let peer = pending.peer_addr();
        if let Err(e) = self.establish(pending).await {
            tracing::warn!(%peer, error = %e, "dropping connection");
        }
    }

    async fn establish(self: &Arc<Self>, pending: PendingStub<M>) -> Result<(), ServerError> {
        let peer = pending.peer_addr();
        let stub = pending.negotiate_transport_keys().await?;
        let client =
            ServersideClient::establish(stub, Arc::clone(&self.subscriptions), self.config.session)
                .await?;
        let id = client.id();

        let registered = self.write_registry().register(id, client.clone());
        if !registered {
            tracing::warn!(client = %id, %peer, "duplicate client id, closing");
            client.close().await;
            return Ok(());
        }

        tracing::info!(client = %id, %peer, "client connected");
        let _ = self.events.send(ServerEvent::ClientConnected { id, peer });

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            client.closed().await;
            shared.on_disconnected(id).await;
        });

        Ok(())
    }

    /// Remove `id` once its connection is gone. Safe to race.
    async fn on_disconnected(&self, id: ClientId) {
        if !self.read_registry().contains(id) {
            return;
        }

        let removed = self.write_registry().unregister(id);
        if let Some(client) = removed {
            client.close().await;
            tracing::info!(client = %id, "client disconnected");
            let _ = self.events.send(ServerEvent::ClientDisconnected { id });
        }
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, ClientRegistry<ServersideClient<M>>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, ClientRegistry<ServersideClient<M>>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn deliver<M: Envelope>(message: M, clients: Vec<ServersideClient<M>>) -> usize {
    let mut delivered = 0;
    for client in clients {
        match client.send(&message).await {
            Ok(_) => delivered += 1,
            Err(e) => tracing::debug!(client = %client.id(), error = %e, "delivery skipped"),
        }
    }
    delivered
}
