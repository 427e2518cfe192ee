//! Hub: owns the registry and runs client sessions.
//!
//! The transport layer calls [`Hub::connect`] for every accepted connection.
//! That yields a [`Session`], which is registered at once and deregistered
//! when dropped, and the receiving half of the client's outbound queue, which
//! the transport drains into its socket.

use crate::client::{Client, ClientNamer, DEFAULT_NAME_PREFIX};
use crate::error::{RelayError, RelayResult};
use crate::message::Outbound;
use crate::registry::Registry;
use crate::router::{DecodePolicy, Router};
use futures::{Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Default capacity of a client's outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Prefix for generated client names.
    pub name_prefix: String,
    /// Capacity of each client's outbound queue.
    pub outbound_buffer: usize,
    /// Handling of frames that are not valid envelopes.
    pub decode_policy: DecodePolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            decode_policy: DecodePolicy::default(),
        }
    }
}

/// A frame received from a client's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Why a session's receive loop ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed the connection or the stream ended.
    Closed,
    /// Reading from the transport failed.
    Transport(String),
    /// Routing failed in a way that ends the connection.
    Fatal(RelayError),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Fatal(e) => write!(f, "{e}"),
        }
    }
}

/// A newly connected client, ready to run.
#[derive(Debug)]
pub struct Connection {
    pub session: Session,
    /// Messages to write to this client's transport, in order.
    pub outbound: mpsc::Receiver<Outbound>,
}

/// The relay hub: client naming, registry, and session construction.
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    registry: Registry,
    namer: ClientNamer,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let namer = ClientNamer::new(config.name_prefix.clone());
        Self {
            config,
            registry: Registry::new(),
            namer,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Name and register a new client.
    ///
    /// A duplicate name fails this connection only.
    pub fn connect(&self) -> RelayResult<Connection> {
        let (seq, name) = self.namer.next();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let client = Arc::new(Client::new(name, seq, tx));

        self.registry.try_add(Arc::clone(&client))?;
        info!(client = %client.name(), total = self.registry.len(), "Client connected");

        let router = Router::new(client, self.registry.clone(), self.config.decode_policy);
        Ok(Connection {
            session: Session { router },
            outbound: rx,
        })
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// A registered client's receive side.
///
/// Dropping the session removes the client from the registry, along with its
/// peer link, whatever ended it.
#[derive(Debug)]
pub struct Session {
    router: Router,
}

impl Session {
    pub fn client(&self) -> &Arc<Client> {
        self.router.client()
    }

    pub fn name(&self) -> &str {
        self.router.client().name()
    }

    /// Route one raw frame.
    pub async fn dispatch(&self, frame: &[u8]) -> RelayResult<()> {
        self.router.dispatch(frame).await
    }

    /// Receive loop: routes frames in arrival order until the stream ends,
    /// the client closes, or an error ends the connection. Consumes the
    /// session, so the client is deregistered on return.
    pub async fn run<S, E>(self, frames: S) -> SessionEnd
    where
        S: Stream<Item = Result<Frame, E>>,
        E: fmt::Display,
    {
        let mut frames = std::pin::pin!(frames);
        while let Some(item) = frames.next().await {
            let result = match item {
                Ok(Frame::Text(text)) => self.dispatch(text.as_bytes()).await,
                Ok(Frame::Binary(bytes)) => self.dispatch(&bytes).await,
                Ok(Frame::Close) => return SessionEnd::Closed,
                Err(e) => return SessionEnd::Transport(e.to_string()),
            };
            if let Err(e) = result {
                return SessionEnd::Fatal(e);
            }
        }
        SessionEnd::Closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let registry = self.router.registry();
        let name = self.router.client().name();
        if registry.remove(name).is_some() {
            info!(client = %name, total = registry.len(), "Client disconnected");
        } else {
            debug!(client = %name, "Client already deregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode_outbound;
    use std::convert::Infallible;

    fn frames(texts: &[&str]) -> Vec<Result<Frame, Infallible>> {
        texts.iter().map(|t| Ok(Frame::Text(t.to_string()))).collect()
    }

    #[test]
    fn test_connect_registers_sequential_names() {
        let hub = Hub::default();
        let a = hub.connect().unwrap();
        let b = hub.connect().unwrap();
        assert_eq!(a.session.name(), "Client0");
        assert_eq!(b.session.name(), "Client1");
        assert_eq!(hub.registry().list_names(), vec!["Client0", "Client1"]);
    }

    #[test]
    fn test_drop_deregisters() {
        let hub = Hub::default();
        let conns: Vec<_> = (0..6).map(|_| hub.connect().unwrap()).collect();
        assert_eq!(hub.client_count(), 6);

        let mut survivors = Vec::new();
        for (i, conn) in conns.into_iter().enumerate() {
            if i % 3 == 0 {
                drop(conn);
            } else {
                survivors.push(conn);
            }
        }
        assert_eq!(hub.registry().list_names(), vec!["Client1", "Client2", "Client4", "Client5"]);
        drop(survivors);
        assert!(hub.registry().is_empty());
    }

    #[test]
    fn test_names_not_reused_after_disconnect() {
        let hub = Hub::default();
        let first = hub.connect().unwrap();
        let second = hub.connect().unwrap();
        drop(first);
        let third = hub.connect().unwrap();
        assert_eq!(third.session.name(), "Client2");
        assert_ne!(third.session.name(), second.session.name());
        assert_eq!(hub.client_count(), 2);
    }

    #[test]
    fn test_duplicate_name_fails_only_that_connection() {
        let hub = Hub::default();
        let (tx, _rx) = mpsc::channel(1);
        hub.registry().add(Arc::new(Client::new("Client0", 99, tx)));

        assert!(matches!(hub.connect(), Err(RelayError::DuplicateName(_))));
        // The failed attempt must not evict the existing entry.
        assert!(hub.registry().has("Client0"));
        assert_eq!(hub.connect().unwrap().session.name(), "Client1");
    }

    #[tokio::test]
    async fn test_run_processes_in_order_then_cleans_up() {
        let hub = Hub::default();
        let Connection {
            session,
            mut outbound,
        } = hub.connect().unwrap();

        let input = frames(&[
            r#"{"message":"connect"}"#,
            r#"{"message":"list_connected"}"#,
            r#"{"message":"call"}"#,
        ]);
        let end = session.run(futures::stream::iter(input)).await;
        assert!(matches!(end, SessionEnd::Closed));
        assert_eq!(hub.client_count(), 0);

        let tags: Vec<_> = std::iter::from_fn(|| outbound.try_recv().ok())
            .map(|m| m.tag())
            .collect();
        assert_eq!(tags, vec!["connected", "user_list", "empty_user"]);
    }

    #[tokio::test]
    async fn test_run_stops_at_close_frame() {
        let hub = Hub::default();
        let Connection { session, mut outbound } = hub.connect().unwrap();

        let input = vec![
            Ok::<_, Infallible>(Frame::Close),
            Ok(Frame::Text(r#"{"message":"connect"}"#.to_string())),
        ];
        assert!(matches!(
            session.run(futures::stream::iter(input)).await,
            SessionEnd::Closed
        ));
        assert!(outbound.try_recv().is_err());
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_run_transport_error_cleans_up() {
        let hub = Hub::default();
        let Connection { session, outbound: _outbound } = hub.connect().unwrap();

        let input = vec![Err::<Frame, _>("connection reset")];
        match session.run(futures::stream::iter(input)).await {
            SessionEnd::Transport(e) => assert_eq!(e, "connection reset"),
            other => panic!("Expected Transport, got {other:?}"),
        }
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_strict_decode_ends_session() {
        let hub = Hub::new(HubConfig {
            decode_policy: DecodePolicy::Disconnect,
            ..HubConfig::default()
        });
        let peer = hub.connect().unwrap();
        let Connection { session, outbound: _outbound } = hub.connect().unwrap();
        peer.session
            .dispatch(br#"{"message":"call","data":"Client1"}"#)
            .await
            .unwrap();

        let input = frames(&["garbage"]);
        assert!(matches!(
            session.run(futures::stream::iter(input)).await,
            SessionEnd::Fatal(RelayError::Decode(_))
        ));
        // The survivor is left registered with no dangling link.
        assert_eq!(hub.registry().list_names(), vec!["Client0"]);
        assert!(hub.registry().peer_of("Client0").is_none());
    }

    #[tokio::test]
    async fn test_binary_frames_are_routed() {
        let hub = Hub::default();
        let Connection { session, mut outbound } = hub.connect().unwrap();
        tokio_test::assert_ok!(session.dispatch(br#"{"message":"connect"}"#).await);
        let reply = outbound.recv().await.unwrap();
        let text = reply.encode().unwrap();
        assert_eq!(decode_outbound(text.as_bytes()).unwrap().tag(), "connected");

        let input = vec![Ok::<_, Infallible>(Frame::Binary(
            br#"{"message":"list_connected"}"#.to_vec(),
        ))];
        session.run(futures::stream::iter(input)).await;
        match outbound.recv().await {
            Some(Outbound::UserList(names)) => assert_eq!(names, vec!["Client0"]),
            other => panic!("Expected user_list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_sessions_link_consistently() {
        let hub = Arc::new(Hub::default());
        let conns: Vec<_> = (0..20).map(|_| hub.connect().unwrap()).collect();

        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for (i, conn) in conns.into_iter().enumerate() {
            receivers.push(conn.outbound);
            let target = if i % 2 == 0 { i + 1 } else { i - 1 };
            let session = conn.session;
            tasks.push(tokio::spawn(async move {
                let frame = format!(r#"{{"message":"call","data":"Client{target}"}}"#);
                session.dispatch(frame.as_bytes()).await.unwrap();
                session
            }));
        }
        let mut sessions = Vec::new();
        for t in tasks {
            sessions.push(t.await.unwrap());
        }

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap().tag(), "ready_to_connect");
        }
        for i in 0..20usize {
            let partner = if i % 2 == 0 { i + 1 } else { i - 1 };
            assert_eq!(
                hub.registry().peer_name_of(&format!("Client{i}")),
                Some(format!("Client{partner}"))
            );
        }
        drop(sessions);
        assert!(hub.registry().is_empty());
    }
}
