//! Connection session: a stub plus the task that reads it.
//!
//! Shared by both ends of a link. The client side wraps it in a `Client` that
//! can connect again after a close; the server side keeps one per accepted connection.
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────────────┐ connect ┌────────────┐ identity ┌───────────┐
//! │ Disconnected │────────>│ Connecting │─────────>│ Connected │
//! └──────────────┘         └────────────┘          └───────────┘
//!                                │ handshake error       │ close / peer closed / read error
//!                                ↓                       ↓
//!                         ┌──────────────┐          ┌────────┐
//!                         │ Disconnected │          │ Closed │
//!                         └──────────────┘          └────────┘
//! ```
//!
//! A session starts out `Connected` and only ever moves to `Closed`. The two
//! earlier states belong to whoever is building the stub.
//!
//! # Cancellation
//!
//! `close` raises a shutdown signal that the read loop selects on, shuts the
//! writer down, then waits up to [`SessionConfig::close_timeout`] for the
//! loop to finish before aborting it.

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use blocklink_proto::{ClientId, Envelope};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::SessionConfig,
    error::SessionError,
    frame::ReadOutcome,
    stub::{CryptoStub, LinkInfo, StubReader, StubWriter},
    subscriptions::{Delivery, Subscriptions},
};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stub
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Read loop running, sends allowed
    Connected,
    /// Terminal
    Closed,
}

/// Bytes moved over one connection, including framing and padding.
#[derive(Debug, Default)]
pub struct ByteCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl ByteCounters {
    /// Bytes written.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Bytes read.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Account for `bytes` written.
    pub fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Account for `bytes` read.
    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// A connected link with a running read loop.
///
/// Cheap to clone; clones share the connection.
pub struct Session<M> {
    inner: Arc<Inner<M>>,
}

struct Inner<M> {
    id: ClientId,
    info: LinkInfo,
    config: SessionConfig,
    writer: tokio::sync::Mutex<StubWriter<M>>,
    counters: Arc<ByteCounters>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl<M> Clone for Session<M> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<M: Envelope> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.info.peer)
            .field("state", &self.state())
            .finish()
    }
}

impl<M: Envelope> Session<M> {
    /// Start the read loop for `stub` and return the connected session.
    ///
    /// Every message read is published to `subscriptions` with `id` as the
    /// delivering connection.
    pub fn start(
        id: ClientId,
        stub: CryptoStub<M>,
        subscriptions: Arc<Subscriptions<M>>,
        config: SessionConfig,
    ) -> Self {
        let (reader, writer, info) = stub.into_split();
        let counters = Arc::new(ByteCounters::default());
        let (state, _) = watch::channel(ConnectionState::Connected);
        let state = Arc::new(state);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let read_loop = ReadLoop {
            id,
            reader,
            subscriptions,
            counters: Arc::clone(&counters),
            state: Arc::clone(&state),
            shutdown: shutdown_rx,
            config,
        };
        let task = tokio::spawn(read_loop.run());

        tracing::info!(client = %id, peer = %info.peer, symmetric = %info.symmetric.identifier, "session started");

        Self {
            inner: Arc::new(Inner {
                id,
                info,
                config,
                writer: tokio::sync::Mutex::new(writer),
                counters,
                state,
                shutdown,
                read_task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Identity of this connection.
    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    /// What was agreed during the handshake.
    pub fn info(&self) -> &LinkInfo {
        &self.inner.info
    }

    /// Current state (`Connected` or `Closed`).
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether sends are still accepted.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Byte counters for this connection.
    pub fn counters(&self) -> &ByteCounters {
        &self.inner.counters
    }

    /// Send one message. Returns the bytes written.
    ///
    /// Frames from concurrent callers never interleave.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotConnected` once the session is closed
    /// - `SessionError::Frame` if the write fails
    pub async fn send(&self, message: &M) -> Result<usize, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let written = self.inner.writer.lock().await.write(message).await.inspect_err(|e| {
            tracing::warn!(client = %self.inner.id, error = %e, "send failed");
        })?;
        self.inner.counters.record_sent(written);
        Ok(written)
    }

    /// Send a zero-length frame.
    pub async fn send_empty(&self) -> Result<usize, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let written = self.inner.writer.lock().await.write_empty().await?;
        self.inner.counters.record_sent(written);
        Ok(written)
    }

    /// Stop the read loop and shut the link down. Idempotent.
    pub async fn close(&self) {
        self.inner.state.send_replace(ConnectionState::Closed);
        self.inner.shutdown.send_replace(true);
        self.inner.writer.lock().await.shutdown().await;

        let task = self.inner.read_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut task) = task else {
            return;
        };

        let limit = self.inner.config.close_timeout();
        if tokio::time::timeout(limit, &mut task).await.is_err() {
            tracing::warn!(client = %self.inner.id, ?limit, "read loop did not stop, aborting");
            task.abort();
        }
        tracing::info!(client = %self.inner.id, "session closed");
    }

    /// Best-effort `exit_message`, then [`Self::close`].
    pub async fn disconnect(&self, exit_message: &M) {
        if let Err(e) = self.send(exit_message).await {
            tracing::debug!(client = %self.inner.id, error = %e, "exit message not sent");
        }
        self.close().await;
    }

    /// Resolves once the session is closed, by either side.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        loop {
            if *state.borrow_and_update() == ConnectionState::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

struct ReadLoop<M> {
    id: ClientId,
    reader: StubReader<M>,
    subscriptions: Arc<Subscriptions<M>>,
    counters: Arc<ByteCounters>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Receiver<bool>,
    config: SessionConfig,
}

impl<M: Envelope> ReadLoop<M> {
    async fn run(mut self) {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                outcome = self.reader.read_next() => outcome,
            };

            match outcome {
                ReadOutcome::Message { message, size } => {
                    self.counters.record_received(size);
                    let delivery = Delivery { connection: self.id, size };
                    self.subscriptions.publish(message.key(), &message, delivery);
                },
                ReadOutcome::Empty { size } => self.counters.record_received(size),
                ReadOutcome::Closed => {
                    tracing::info!(client = %self.id, "peer closed connection");
                    break;
                },
                ReadOutcome::Error(e) if e.is_transient() => {
                    tracing::debug!(client = %self.id, error = %e, "transient read error, retrying");
                    tokio::time::sleep(self.config.poll_interval).await;
                },
                ReadOutcome::Error(e) => {
                    tracing::warn!(client = %self.id, error = %e, "read failed, dropping connection");
                    break;
                },
            }
        }

        self.state.send_replace(ConnectionState::Closed);
    }
}
