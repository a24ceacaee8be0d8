//! Blocklink server.
//!
//! Accepts TCP connections, negotiates an encrypted link with each, assigns
//! every client a fresh identity and dispatches what clients send to
//! server-wide subscribers.
//!
//! # Architecture
//!
//! [`MessageServer`] owns the listener and a [`ClientRegistry`] of
//! [`ServersideClient`]s. Handshakes run on their own tasks so a slow peer
//! never stalls the accept loop. Each client's read loop publishes into the
//! server's subscriptions with the sender's identity attached.
//!
//! # Components
//!
//! - [`MessageServer`]: Start/stop, broadcast, targeted sends, disconnects
//! - [`ServersideClient`]: One accepted connection
//! - [`ClientRegistry`]: Identity → client bookkeeping
//! - [`ServerEvent`]/[`ServerCommand`]: Lifecycle notifications and queued
//!   requests
//! - [`Relay`]: Chat relay used by the `blocklink-server` binary

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod registry;
mod relay;
mod server;
mod serverside;

pub use blocklink_core::{Delivery, LinkConfig, SessionConfig, SharedSerializer, SubscriptionId};
pub use config::{DEFAULT_EVENT_CAPACITY, DEFAULT_PORT, ServerConfig};
pub use error::ServerError;
pub use registry::ClientRegistry;
pub use relay::Relay;
pub use server::{MessageServer, ServerCommand, ServerEvent};
pub use serverside::ServersideClient;
