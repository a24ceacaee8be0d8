//! Client
//!
//! Connects to a blocklink server, negotiates keys, learns its identity from
//! the server's first frame and then publishes every received message to
//! subscribers keyed by message key.
//!
//! # Components
//!
//! - [`Client`]: Connection owner with connect/send/disconnect and
//!   long-lived subscriptions
//! - [`StubConnection`]: Handle to one live session with request/response
//! - [`ClientError`]/[`RequestError`]: Failure modes

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod connection;
mod error;

pub use blocklink_core::{ConnectionState, Delivery, LinkConfig, SessionConfig, SubscriptionId};
pub use client::Client;
pub use connection::StubConnection;
pub use error::{ClientError, RequestError};
