//! Blocklink connection core.
//!
//! Turns a TCP socket into a negotiated, encrypted, framed link and runs the
//! read loop that publishes what arrives.
//!
//! # Architecture
//!
//! ```text
//! CryptoListener::accept_raw ─> PendingStub ─┐
//! CryptoStub::connect ───────────────────────┤ LinkNegotiator
//!                                            ↓
//!                                       CryptoStub ── into_split ──> Session
//!                                    (FrameReader +                 (read loop task,
//!                                     FrameWriter)                   locked writer)
//!                                                                        │
//!                                                                        ↓
//!                                                              Subscriptions::publish
//! ```
//!
//! # Components
//!
//! - [`LinkNegotiator`]: Handshake state machine over any duplex stream
//! - [`FrameReader`]/[`FrameWriter`]: Block-padded, encrypted frames
//! - [`CryptoStub`]/[`PendingStub`]/[`CryptoListener`]: TCP plumbing
//! - [`Session`]: Read loop, serialized sends, byte counters, cooperative
//!   shutdown
//! - [`Subscriptions`]: Message-key dispatch with panic isolation
//! - [`LinkConfig`]/[`SessionConfig`]: Algorithms, limits and timeouts

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod frame;
mod listener;
pub mod negotiator;
mod session;
mod stub;
mod subscriptions;

pub use config::{LinkConfig, SessionConfig};
pub use error::{FrameError, HandshakeError, SessionError};
pub use frame::{FrameReader, FrameWriter, LENGTH_PREFIX, ReadOutcome, SharedSerializer, padded_frame_len};
pub use listener::CryptoListener;
pub use negotiator::{LinkNegotiator, NegotiatedSession, NegotiationState};
pub use session::{ByteCounters, ConnectionState, Session};
pub use stub::{CryptoStub, LinkInfo, PendingStub, StubReader, StubWriter};
pub use subscriptions::{Delivery, Handler, SubscriptionId, Subscriptions};
