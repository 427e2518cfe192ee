//! SignalHub core: client registry and signaling message routing.
//!
//! Clients connect over a persistent bidirectional channel, find each other
//! by name, and exchange connection-negotiation payloads that the relay
//! forwards without looking inside.
//!
//! ## Architecture
//!
//! - **Hub**: names new clients and hands out their sessions
//! - **Registry**: tracks connected clients and the peer links between them
//! - **Router**: per-client state machine that answers or relays each message
//! - **Inbound / Outbound**: the JSON envelope, decoded once at the boundary
//!
//! The crate does no network I/O of its own: a transport feeds
//! [`hub::Frame`]s into [`Session::run`] and writes out whatever arrives on
//! the connection's outbound queue.

pub mod client;
pub mod error;
pub mod hub;
pub mod message;
pub mod registry;
pub mod router;

pub use client::{Client, ClientNamer};
pub use error::{RelayError, RelayResult};
pub use hub::{Connection, Frame, Hub, HubConfig, Session, SessionEnd};
pub use message::{decode_inbound, decode_outbound, CallTarget, Inbound, Outbound, SignalKind};
pub use registry::{LinkError, Registry};
pub use router::{DecodePolicy, Router};
