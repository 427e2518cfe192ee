//! Signaling envelope types.
//!
//! Every frame exchanged with a client is a JSON object of the shape
//! `{"message": <tag>, "data": <payload>}`. Inbound frames are decoded once
//! into [`Inbound`], where the tag decides the payload type. Negotiation
//! payloads (`offer`, `answer`, `candidate`) are kept as raw JSON so they can
//! be relayed byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Opaque negotiation payload, kept exactly as the sender wrote it.
pub type Payload = Box<RawValue>;

/// Envelope as it appears on the wire, before the tag is interpreted.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    message: String,
    #[serde(default)]
    data: Option<Payload>,
}

/// Envelope written to the wire. `data` is left out for control-only tags.
#[derive(Serialize)]
struct EnvelopeOut<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<PayloadOut<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadOut<'a> {
    Names(&'a [String]),
    Raw(&'a RawValue),
}

/// The negotiation message kinds that are relayed between linked peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    /// Wire tag for this kind (identical inbound and outbound).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a `call` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// `data` absent, `null`, or an empty string.
    Missing,
    /// `data` is a non-JSON-string value (number, object, ...).
    NotAString,
    /// A non-empty client name.
    Name(String),
}

impl CallTarget {
    fn from_payload(payload: Option<&RawValue>) -> Self {
        let Some(raw) = payload else {
            return Self::Missing;
        };
        match serde_json::from_str::<Option<String>>(raw.get()) {
            Ok(None) => Self::Missing,
            Ok(Some(name)) if name.is_empty() => Self::Missing,
            Ok(Some(name)) => Self::Name(name),
            Err(_) => Self::NotAString,
        }
    }
}

/// A decoded client-to-relay message.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Ask for the names of every connected client.
    ListConnected,
    /// Link with another client by name.
    Call(CallTarget),
    /// Liveness handshake, answered with `connected`.
    Connect,
    /// Negotiation data for the linked peer.
    Signal(SignalKind, Option<Payload>),
    /// A tag the relay does not know. Ignored.
    Unknown(String),
}

impl Inbound {
    /// The tag this message arrived with.
    pub fn tag(&self) -> &str {
        match self {
            Self::ListConnected => "list_connected",
            Self::Call(_) => "call",
            Self::Connect => "connect",
            Self::Signal(kind, _) => kind.as_str(),
            Self::Unknown(tag) => tag,
        }
    }
}

/// Decode one inbound frame.
///
/// Only a frame that is not a JSON object with a string `message` field is an
/// error; an unrecognized tag decodes to [`Inbound::Unknown`].
pub fn decode_inbound(frame: &[u8]) -> Result<Inbound, serde_json::Error> {
    let raw: RawEnvelope = serde_json::from_slice(frame)?;
    let inbound = match raw.message.as_str() {
        // Older clients used the `get_connected*` spellings.
        "list_connected" | "get_connected" | "get_connected_users" => Inbound::ListConnected,
        "call" => Inbound::Call(CallTarget::from_payload(raw.data.as_deref())),
        "connect" => Inbound::Connect,
        tag => match SignalKind::from_tag(tag) {
            Some(kind) => Inbound::Signal(kind, raw.data),
            None => Inbound::Unknown(raw.message),
        },
    };
    Ok(inbound)
}

/// A relay-to-client message.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Snapshot of connected client names.
    UserList(Vec<String>),
    /// The call succeeded and the caller is now linked.
    ReadyToConnect,
    /// The call target is not connected.
    UserNotFound,
    /// The call carried no target.
    EmptyUser,
    /// The call target was the caller itself, or not a name.
    InvalidUser,
    /// Negotiation data was sent without a linked peer.
    NoPeer,
    /// Answer to `connect`.
    Connected,
    /// The previous frame could not be decoded.
    MalformedMessage,
    /// Negotiation data relayed from the linked peer.
    Signal(SignalKind, Option<Payload>),
}

impl Outbound {
    /// Wire tag of this message.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::UserList(_) => "user_list",
            Self::ReadyToConnect => "ready_to_connect",
            Self::UserNotFound => "user_not_found",
            Self::EmptyUser => "empty_user",
            Self::InvalidUser => "invalid_user",
            Self::NoPeer => "no_peer",
            Self::Connected => "connected",
            Self::MalformedMessage => "malformed_message",
            Self::Signal(kind, _) => kind.as_str(),
        }
    }

    /// Raw JSON of a relayed payload, if this is a signal carrying one.
    pub fn signal_payload(&self) -> Option<&str> {
        match self {
            Self::Signal(_, Some(raw)) => Some(raw.get()),
            _ => None,
        }
    }

    /// Serialize to the JSON text sent in one frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            Self::UserList(names) => Some(PayloadOut::Names(names)),
            Self::Signal(_, Some(raw)) => Some(PayloadOut::Raw(raw)),
            _ => None,
        };
        serde_json::to_string(&EnvelopeOut {
            message: self.tag(),
            data,
        })
    }
}

/// Parse a frame the relay sent. Used by clients and tests.
pub fn decode_outbound(frame: &[u8]) -> Result<Outbound, serde_json::Error> {
    use serde::de::Error as _;

    let raw: RawEnvelope = serde_json::from_slice(frame)?;
    let msg = match raw.message.as_str() {
        "user_list" => {
            let names = match raw.data {
                Some(data) => serde_json::from_str(data.get())?,
                None => Vec::new(),
            };
            Outbound::UserList(names)
        }
        "ready_to_connect" => Outbound::ReadyToConnect,
        "user_not_found" => Outbound::UserNotFound,
        "empty_user" => Outbound::EmptyUser,
        "invalid_user" => Outbound::InvalidUser,
        "no_peer" => Outbound::NoPeer,
        "connected" => Outbound::Connected,
        "malformed_message" => Outbound::MalformedMessage,
        tag => match SignalKind::from_tag(tag) {
            Some(kind) => Outbound::Signal(kind, raw.data),
            None => {
                return Err(serde_json::Error::custom(format!(
                    "unknown outbound tag `{tag}`"
                )))
            }
        },
    };
    Ok(msg)
}
