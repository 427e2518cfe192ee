//! `signalhub` binary: load config, bind, serve until Ctrl+C or SIGTERM.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use signalhub_server::{load_config, SignalServer};
use tracing::info;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_stderr();

    let mut config = load_config(cli.config.as_deref());
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    config.validate().context("Invalid configuration")?;

    if cli.check_config {
        let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        print!("{text}");
        return Ok(());
    }

    let server = SignalServer::bind(&config).await?;
    let addr = server.local_addr()?;
    info!(
        addr = %addr,
        ws_path = %config.ws_path,
        origins = ?config.allowed_origins,
        "SignalHub listening"
    );

    server.serve(shutdown_signal()).await?;
    info!("SignalHub stopped");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;

    info!("Shutdown signal received");
}
