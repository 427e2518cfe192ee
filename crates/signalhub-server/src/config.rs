//! Configuration loading from `~/.signalhub/config.toml` with defaults.
//!
//! Precedence, lowest first: built-in defaults, the config file, the `PORT`
//! and `SIGNALHUB_LISTEN` environment variables, then CLI flags (applied by
//! the binary).

use serde::{Deserialize, Serialize};
use signalhub_wire::{DecodePolicy, HubConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Env var holding a full listen address, e.g. `127.0.0.1:9000`.
pub const ENV_LISTEN: &str = "SIGNALHUB_LISTEN";
/// Env var holding only a port, as set by most PaaS platforms.
pub const ENV_PORT: &str = "PORT";

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ws_path must start with '/': {0:?}")]
    InvalidWsPath(String),
    #[error("outbound_buffer must be at least 1")]
    ZeroOutboundBuffer,
    #[error("max_frame_bytes must be at least 1")]
    ZeroMaxFrame,
}

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Path of the WebSocket upgrade endpoint.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Browser origins (`host[:port]`) allowed to connect. `"*"` allows all.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Prefix for generated client names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Per-client outbound queue capacity.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Largest accepted WebSocket message.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Whether a malformed envelope is answered or ends the connection.
    #[serde(default)]
    pub decode_policy: DecodePolicy,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["localhost:8080".to_string()]
}
fn default_name_prefix() -> String {
    signalhub_wire::client::DEFAULT_NAME_PREFIX.to_string()
}
fn default_outbound_buffer() -> usize {
    signalhub_wire::hub::DEFAULT_OUTBOUND_BUFFER
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ws_path: default_ws_path(),
            allowed_origins: default_allowed_origins(),
            name_prefix: default_name_prefix(),
            outbound_buffer: default_outbound_buffer(),
            max_frame_bytes: default_max_frame_bytes(),
            decode_policy: DecodePolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidWsPath(self.ws_path.clone()));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::ZeroOutboundBuffer);
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::ZeroMaxFrame);
        }
        Ok(())
    }

    /// Settings for the relay core.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            name_prefix: self.name_prefix.clone(),
            outbound_buffer: self.outbound_buffer,
            decode_policy: self.decode_policy,
        }
    }

    /// Apply `PORT` and `SIGNALHUB_LISTEN` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup(ENV_PORT) {
            match port.trim().parse::<u16>() {
                Ok(p) => self.listen_addr.set_port(p),
                Err(e) => warn!(value = %port, error = %e, "Ignoring invalid PORT"),
            }
        }
        if let Some(addr) = lookup(ENV_LISTEN) {
            match addr.trim().parse::<SocketAddr>() {
                Ok(a) => self.listen_addr = a,
                Err(e) => warn!(value = %addr, error = %e, "Ignoring invalid SIGNALHUB_LISTEN"),
            }
        }
    }
}

/// Default config location: `~/.signalhub/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".signalhub")
        .join("config.toml")
}

/// Load configuration from a TOML file, falling back to defaults, then apply
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> RelayConfig {
    let mut config = read_config_file(path);
    config.apply_env(|key| std::env::var(key).ok());
    config
}

fn read_config_file(path: Option<&Path>) -> RelayConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return RelayConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<RelayConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                RelayConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            RelayConfig::default()
        }
    }
}
