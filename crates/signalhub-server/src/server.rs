//! HTTP server exposing the relay over WebSocket.
//!
//! Routes:
//! - `GET {ws_path}`: origin check, then WebSocket upgrade into a relay session
//! - `GET /`: liveness and basic stats

use crate::config::{ConfigError, RelayConfig};
use crate::origin::OriginPolicy;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Sink, SinkExt, StreamExt};
use signalhub_wire::{Connection, Frame, Hub, Outbound};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Errors from starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub origins: Arc<OriginPolicy>,
    pub max_frame_bytes: usize,
}

impl AppState {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            hub: Arc::new(Hub::new(config.hub_config())),
            origins: Arc::new(OriginPolicy::new(config.allowed_origins.iter().cloned())),
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// Build the axum router.
pub fn build_router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route("/", get(info))
        .route(
            ws_path,
            get(ws_handler)
                .route_layer(middleware::from_fn_with_state(state.clone(), check_origin)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A bound, not yet running, relay server.
pub struct SignalServer {
    listener: TcpListener,
    router: Router,
    hub: Arc<Hub>,
}

impl SignalServer {
    /// Validate the config and bind the listen address.
    pub async fn bind(config: &RelayConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen_addr,
                source,
            })?;

        let state = AppState::from_config(config);
        let hub = Arc::clone(&state.hub);
        Ok(Self {
            listener,
            router: build_router(state, &config.ws_path),
            hub,
        })
    }

    /// Actual bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "signalhub",
        "version": env!("CARGO_PKG_VERSION"),
        "clients": state.hub.client_count(),
    }))
}

/// Refuse the upgrade for origins outside the policy.
async fn check_origin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = match request.headers().get(header::ORIGIN).map(|v| v.to_str()) {
        None => None,
        Some(Ok(origin)) => Some(origin),
        Some(Err(_)) => {
            warn!("Rejected connection with non-ASCII Origin header");
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    };
    if !state.origins.is_allowed(origin) {
        warn!(origin = ?origin, "Rejected connection from disallowed origin");
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }
    next.run(request).await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.max_message_size(state.max_frame_bytes)
        .max_frame_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Serve one WebSocket for its whole lifetime.
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let Connection { session, outbound } = match hub.connect() {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "Refusing connection");
            return;
        }
    };
    let name = session.name().to_string();
    let (ws_tx, ws_rx) = socket.split();

    // Sole writer for this socket: replies and relayed messages both go
    // through the outbound queue.
    let writer = tokio::spawn(write_outbound(outbound, ws_tx, name.clone()));

    let frames = ws_rx.filter_map(|item| async move {
        match item {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
            Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
            Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
            // Ping/Pong are answered by axum.
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    });

    let end = session.run(frames).await;
    info!(client = %name, reason = %end, "Connection ended");

    if let Err(e) = writer.await {
        error!(client = %name, error = %e, "Writer task failed");
    }
}

/// Drain a client's outbound queue into its socket.
///
/// Stops at the first encode or write failure and drops the queue, so the
/// session's next reply fails with `ChannelClosed` and the connection ends.
async fn write_outbound<S>(mut outbound: mpsc::Receiver<Outbound>, mut sink: S, name: String)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(msg) = outbound.recv().await {
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(client = %name, tag = msg.tag(), error = %e, "Failed to encode message");
                break;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!(client = %name, error = %e, "WebSocket write failed");
            break;
        }
    }
    drop(outbound);
    let _ = sink.close().await;
}
