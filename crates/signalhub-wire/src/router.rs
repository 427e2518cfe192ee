//! Per-client message routing.
//!
//! A [`Router`] belongs to one client connection and handles that client's
//! frames one at a time, in arrival order. Registry queries and call requests
//! are answered locally; negotiation messages are relayed to the linked peer.

use crate::client::Client;
use crate::error::{RelayError, RelayResult};
use crate::message::{decode_inbound, CallTarget, Inbound, Outbound, Payload, SignalKind};
use crate::registry::{LinkError, Registry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do with a frame that is not a valid envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Answer `malformed_message` and keep the connection.
    #[default]
    Reply,
    /// End the connection.
    Disconnect,
}

/// Routes the frames of one client.
#[derive(Debug)]
pub struct Router {
    client: Arc<Client>,
    registry: Registry,
    decode_policy: DecodePolicy,
}

impl Router {
    pub fn new(client: Arc<Client>, registry: Registry, decode_policy: DecodePolicy) -> Self {
        Self {
            client,
            registry,
            decode_policy,
        }
    }

    /// The client this router serves.
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decode and route one raw frame.
    ///
    /// An `Err` means the connection must end: either the client's own
    /// outbound queue is closed, or the frame was malformed under
    /// [`DecodePolicy::Disconnect`].
    pub async fn dispatch(&self, frame: &[u8]) -> RelayResult<()> {
        match decode_inbound(frame) {
            Ok(inbound) => self.route(inbound).await,
            Err(e) => match self.decode_policy {
                DecodePolicy::Reply => {
                    warn!(client = %self.client.name(), error = %e, "Malformed envelope");
                    self.client.send(Outbound::MalformedMessage).await
                }
                DecodePolicy::Disconnect => Err(RelayError::Decode(e)),
            },
        }
    }

    /// Route one decoded message.
    pub async fn route(&self, inbound: Inbound) -> RelayResult<()> {
        match inbound {
            Inbound::ListConnected => {
                let names = self.registry.list_names();
                self.client.send(Outbound::UserList(names)).await
            }
            Inbound::Call(target) => {
                let reply = self.call(target);
                self.client.send(reply).await
            }
            Inbound::Connect => self.client.send(Outbound::Connected).await,
            Inbound::Signal(kind, payload) => self.forward(kind, payload).await,
            Inbound::Unknown(tag) => {
                debug!(client = %self.client.name(), tag = %tag, "Ignoring unknown message");
                Ok(())
            }
        }
    }

    /// Link with `target`; returns the reply for the caller. The callee is
    /// not told.
    fn call(&self, target: CallTarget) -> Outbound {
        let me = self.client.name();
        let target = match target {
            CallTarget::Missing => return Outbound::EmptyUser,
            CallTarget::NotAString => return Outbound::InvalidUser,
            CallTarget::Name(name) => name,
        };

        match self.registry.link(me, &target) {
            Ok(()) => {
                info!(client = %me, peer = %target, "Peers linked");
                Outbound::ReadyToConnect
            }
            Err(LinkError::SelfLink(_)) => Outbound::InvalidUser,
            Err(LinkError::NotFound(_)) => Outbound::UserNotFound,
            Err(e @ LinkError::CallerGone(_)) => {
                // Only reachable while this connection is being torn down.
                warn!(client = %me, error = %e, "Call from unregistered client");
                Outbound::UserNotFound
            }
        }
    }

    /// Relay a negotiation message to the linked peer, or answer `no_peer`.
    async fn forward(&self, kind: SignalKind, payload: Option<Payload>) -> RelayResult<()> {
        let me = self.client.name();
        let Some(peer) = self.registry.peer_of(me) else {
            debug!(client = %me, kind = %kind, "No linked peer");
            return self.client.send(Outbound::NoPeer).await;
        };

        // Never wait on the peer's queue: a peer that stopped reading must not
        // stall this client's loop.
        if let Err(e) = peer.try_send(Outbound::Signal(kind, payload)) {
            match e {
                RelayError::QueueFull(_) => {
                    warn!(client = %me, peer = %peer.name(), "Peer not draining, dropping link")
                }
                _ => debug!(client = %me, peer = %peer.name(), error = %e, "Relay to peer failed"),
            }
            self.registry.unlink_if(me, peer.name());
            return self.client.send(Outbound::NoPeer).await;
        }
        debug!(client = %me, peer = %peer.name(), kind = %kind, "Relayed");
        Ok(())
    }
}
