//! Clap CLI definitions for the relay binary.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  signalhub                           Serve with ~/.signalhub/config.toml or defaults
  signalhub --listen 127.0.0.1:9000   Override the listen address
  signalhub --check-config            Print the effective config and exit

Environment:
  PORT               Listen port override
  SIGNALHUB_LISTEN   Listen address override (wins over PORT)
  RUST_LOG           Log filter, e.g. signalhub_wire=debug";

/// SignalHub: WebSocket signaling relay for WebRTC peers.
#[derive(Debug, Parser)]
#[command(name = "signalhub", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address; overrides config and environment.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Validate and print the effective configuration, then exit.
    #[arg(long)]
    pub check_config: bool,
}
