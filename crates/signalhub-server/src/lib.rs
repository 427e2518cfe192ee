//! HTTP/WebSocket front end for the SignalHub relay.
//!
//! Binds an axum server, checks browser origins, upgrades connections and
//! hands each socket to a [`signalhub_wire::Session`].

pub mod config;
pub mod origin;
pub mod server;

pub use config::{default_config_path, load_config, ConfigError, RelayConfig};
pub use origin::OriginPolicy;
pub use server::{build_router, AppState, ServerError, SignalServer};
