//! Request/response over a live session.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use blocklink_core::{ByteCounters, Session, SessionError, SubscriptionId, Subscriptions};
use blocklink_proto::{ClientId, Envelope, MessageKey};
use tokio::sync::oneshot;

use crate::error::RequestError;

/// Unsubscribes on drop, including when a request future is cancelled.
struct Subscription<'a, M> {
    subscriptions: &'a Subscriptions<M>,
    id: SubscriptionId,
}

impl<M> Drop for Subscription<'_, M> {
    fn drop(&mut self) {
        self.subscriptions.unsubscribe(self.id);
    }
}

/// Handle to one connected session and the subscriptions it publishes to.
///
/// Cheap to clone. Stays usable after the session closes; every operation
/// then fails with a disconnected error.
pub struct StubConnection<M> {
    session: Session<M>,
    subscriptions: Arc<Subscriptions<M>>,
}

impl<M> Clone for StubConnection<M> {
    fn clone(&self) -> Self {
        Self { session: self.session.clone(), subscriptions: Arc::clone(&self.subscriptions) }
    }
}

impl<M: Envelope> StubConnection<M> {
    /// Wrap a session whose read loop publishes to `subscriptions`.
    pub fn new(session: Session<M>, subscriptions: Arc<Subscriptions<M>>) -> Self {
        Self { session, subscriptions }
    }

    /// Identity of the connection.
    pub fn id(&self) -> ClientId {
        self.session.id()
    }

    /// Underlying session.
    pub fn session(&self) -> &Session<M> {
        &self.session
    }

    /// Byte counters of the connection.
    pub fn counters(&self) -> &ByteCounters {
        self.session.counters()
    }

    /// Send one message.
    pub async fn send(&self, message: &M) -> Result<usize, SessionError> {
        self.session.send(message).await
    }

    /// Send `message` and wait for the first message with `response_key`.
    ///
    /// The temporary subscription is removed whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `RequestError::Timeout` if nothing arrives within `timeout`
    /// - `RequestError::Disconnected` if the connection closes first
    /// - `RequestError::Send` if the request cannot be written
    pub async fn request(
        &self,
        message: &M,
        response_key: MessageKey,
        timeout: Duration,
    ) -> Result<M, RequestError>
    where
        M: Clone,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.subscriptions.subscribe(response_key, move |response: &M, _| {
            if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(response.clone());
            }
        });
        let _subscription = Subscription { subscriptions: &self.subscriptions, id };

        self.exchange(message, rx, timeout).await
    }

    async fn exchange(
        &self,
        message: &M,
        response: oneshot::Receiver<M>,
        timeout: Duration,
    ) -> Result<M, RequestError> {
        self.session.send(message).await?;

        let wait = async {
            tokio::select! {
                biased;
                response = response => response.map_err(|_| RequestError::Disconnected),
                () = self.session.closed() => Err(RequestError::Disconnected),
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| RequestError::Timeout(timeout))?
    }
}
