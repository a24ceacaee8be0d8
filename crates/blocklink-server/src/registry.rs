//! Registry of connected clients.
//!
//! Maps server-assigned identities to the handle used to reach each client.
//! The registry itself is not synchronized; the server keeps it behind a
//! reader/writer lock so broadcasts only ever take the read side.

use std::collections::HashMap;

use blocklink_proto::ClientId;

/// Connected clients by identity.
///
/// Generic over the handle so the bookkeeping can be exercised without
/// sockets; the server stores `ServersideClient`s.
#[derive(Debug)]
pub struct ClientRegistry<C> {
    clients: HashMap<ClientId, C>,
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self { clients: HashMap::new() }
    }
}

impl<C: Clone> ClientRegistry<C> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under `id`.
    ///
    /// Returns `false` and leaves the registry untouched if `id` is taken.
    pub fn register(&mut self, id: ClientId, client: C) -> bool {
        if self.clients.contains_key(&id) {
            return false;
        }
        self.clients.insert(id, client);
        true
    }

    /// Remove `id`, returning its handle if it was registered.
    pub fn unregister(&mut self, id: ClientId) -> Option<C> {
        self.clients.remove(&id)
    }

    /// Check if `id` is registered.
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Handle for `id`. `None` if not registered.
    pub fn get(&self, id: ClientId) -> Option<&C> {
        self.clients.get(&id)
    }

    /// Registered identities, in no particular order.
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Point-in-time copy of every handle.
    pub fn snapshot(&self) -> Vec<C> {
        self.clients.values().cloned().collect()
    }

    /// Handles for the registered subset of `targets`.
    ///
    /// Unknown ids are skipped. A target listed twice is returned once.
    pub fn select(&self, targets: impl IntoIterator<Item = ClientId>) -> Vec<C> {
        let mut seen = Vec::new();
        targets
            .into_iter()
            .filter_map(|id| {
                if seen.contains(&id) {
                    return None;
                }
                seen.push(id);
                self.clients.get(&id).cloned()
            })
            .collect()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
