//! Relay error types.

use thiserror::Error;

/// Errors raised while serving one client connection.
///
/// None of these are process-fatal: each ends at most the connection that
/// produced it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// An inbound frame was not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),
    /// The writer side of a client's connection has gone away.
    #[error("Outbound channel for {0} closed")]
    ChannelClosed(String),
    /// A client's outbound queue is at capacity.
    #[error("Outbound queue for {0} is full")]
    QueueFull(String),
    /// A client with this name is already registered.
    #[error("Client name already registered: {0}")]
    DuplicateName(String),
}

/// Alias for relay results.
pub type RelayResult<T> = Result<T, RelayError>;
