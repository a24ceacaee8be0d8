//! Message-key subscriptions.
//!
//! Handlers are registered per [`MessageKey`] and run on the read-loop task
//! of the connection that received the message, in registration order.
//! Dispatch works on a snapshot, so a handler may subscribe or unsubscribe
//! (itself included) without deadlocking; the change applies from the next
//! message on.
//!
//! A panicking handler is caught and logged. The remaining handlers still
//! run and the connection keeps reading.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use blocklink_proto::{ClientId, MessageKey};

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Connection that received the message
    pub connection: ClientId,
    /// Frame size on the wire
    pub size: usize,
}

/// Subscriber callback.
pub type Handler<M> = Arc<dyn Fn(&M, Delivery) + Send + Sync>;

/// Handle returned by [`Subscriptions::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Message key → ordered handlers.
pub struct Subscriptions<M> {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<MessageKey, Vec<(SubscriptionId, Handler<M>)>>>,
}

impl<M> Default for Subscriptions<M> {
    fn default() -> Self {
        Self { next_id: AtomicU64::new(1), handlers: RwLock::new(HashMap::new()) }
    }
}

impl<M> fmt::Debug for Subscriptions<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("Subscriptions").field("handlers", &counts).finish()
    }
}

impl<M> Subscriptions<M> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every message with `key`.
    pub fn subscribe<F>(&self, key: MessageKey, handler: F) -> SubscriptionId
    where
        F: Fn(&M, Delivery) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        let mut found = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        found
    }

    /// Number of handlers registered for `key`.
    pub fn subscriber_count(&self, key: MessageKey) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).get(&key).map_or(0, Vec::len)
    }

    /// Run every handler for `key`. Returns how many ran to completion.
    pub fn publish(&self, key: MessageKey, message: &M, delivery: Delivery) -> usize {
        let snapshot: Vec<Handler<M>> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&key) {
                Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
                None => return 0,
            }
        };

        let mut completed = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(message, delivery))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(key, connection = %delivery.connection, %reason, "subscriber panicked");
                },
            }
        }
        completed
    }
}
