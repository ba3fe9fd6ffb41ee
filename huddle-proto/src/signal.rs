//! Signaling message types and their JSON encoding.
//!
//! Every frame is a JSON object carrying a `type` tag. Control messages
//! (`join`, `your-id`, `new-peer`, `existing-peers`, `peer-left`) are modelled
//! by [`SignalMessage`]. Point-to-point negotiation messages (`offer`,
//! `answer`, `ice`) are modelled by [`Negotiation`], which types only the
//! routing keys and keeps every other member as raw JSON so the relay
//! forwards it without re-encoding.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::peer::{PeerId, PeerInfo};

/// Error type for signaling encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The frame is not valid JSON or does not match the message shape.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` tag names no known message.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Control messages exchanged between browsers and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Client announces itself with an optional display name.
    Join {
        /// Display name; the relay substitutes a placeholder when absent.
        #[serde(default)]
        name: Option<String>,
    },

    /// Relay tells a client its assigned identity.
    YourId {
        /// The identity assigned to the receiving client.
        id: PeerId,
    },

    /// Relay announces a newly joined participant to everyone else.
    NewPeer {
        /// Identity of the new participant.
        id: PeerId,
        /// Display name of the new participant.
        name: String,
    },

    /// Relay lists the participants that had joined before the receiver.
    ExistingPeers {
        /// Previously joined participants, in join order.
        peers: Vec<PeerInfo>,
    },

    /// Relay announces that a participant has left.
    PeerLeft {
        /// Identity of the departed participant.
        id: PeerId,
    },
}

/// Which negotiation step a [`Negotiation`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationKind {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// Trickled ICE candidate.
    Ice,
}

impl NegotiationKind {
    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Ice => "ice",
        }
    }
}

impl std::fmt::Display for NegotiationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque JSON value carried through the relay untouched.
///
/// Holds the exact source text of the value, so what is decoded is what gets
/// encoded again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Wraps a JSON text fragment.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Json`] if `json` is not a single valid JSON value.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        Ok(Self(RawValue::from_string(json.to_string())?))
    }

    /// Serializes a value into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Json`] if serialization fails.
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self, ProtoError> {
        Ok(Self(serde_json::value::to_raw_value(value)?))
    }

    /// Returns `true` if the payload is JSON `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.as_json().trim() == "null"
    }

    /// Returns the JSON source text of the payload.
    #[must_use]
    pub fn as_json(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

impl Eq for Payload {}

/// A point-to-point `offer`, `answer` or `ice` message.
///
/// `to` routes the message. `from` is stamped by the relay with the sender's
/// assigned identity, whatever the client put there. Every other member of
/// the object (`name`, `sdp`, `candidate`, and anything a client adds) is
/// kept as raw JSON in arrival order and re-emitted unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Negotiation step, serialized as the `type` tag.
    pub kind: NegotiationKind,
    /// Identity of the recipient.
    pub to: PeerId,
    /// Identity of the sender. A `from` that is not a string decodes as `None`.
    pub from: Option<PeerId>,
    fields: Vec<(String, Payload)>,
}

impl Negotiation {
    /// Creates a negotiation message with no payload fields.
    #[must_use]
    pub const fn new(kind: NegotiationKind, to: PeerId) -> Self {
        Self {
            kind,
            to,
            from: None,
            fields: Vec::new(),
        }
    }

    /// Returns the raw value of a payload field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Payload> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Sets a payload field, replacing any previous value in place.
    ///
    /// Returns `false` and leaves the message untouched for the routing keys
    /// `type`, `to` and `from`, which have their own typed fields.
    pub fn set_field(&mut self, key: &str, value: Payload) -> bool {
        if matches!(key, "type" | "to" | "from") {
            return false;
        }
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key.to_string(), value));
        }
        true
    }

    /// Payload fields in arrival order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sender display name, as sent.
    #[must_use]
    pub fn name(&self) -> Option<&Payload> {
        self.field("name")
    }

    /// Session description (`offer` and `answer`).
    #[must_use]
    pub fn sdp(&self) -> Option<&Payload> {
        self.field("sdp")
    }

    /// ICE candidate (`ice`).
    #[must_use]
    pub fn candidate(&self) -> Option<&Payload> {
        self.field("candidate")
    }
}

impl Serialize for Negotiation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 2 + usize::from(self.from.is_some()) + self.fields.len();
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("type", &self.kind)?;
        map.serialize_entry("to", &self.to)?;
        if let Some(from) = &self.from {
            map.serialize_entry("from", from)?;
        }
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Negotiation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(NegotiationVisitor)
    }
}

struct NegotiationVisitor;

impl<'de> Visitor<'de> for NegotiationVisitor {
    type Value = Negotiation;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("an offer, answer or ice object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Negotiation, A::Error> {
        let mut kind = None;
        let mut to = None;
        let mut from = None;
        let mut fields: Vec<(String, Payload)> = Vec::new();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "type" => kind = Some(map.next_value::<NegotiationKind>()?),
                "to" => to = Some(map.next_value::<PeerId>()?),
                "from" => {
                    let raw = map.next_value::<Payload>()?;
                    from = serde_json::from_str::<PeerId>(raw.as_json()).ok();
                }
                _ => {
                    let value = map.next_value::<Payload>()?;
                    // Last duplicate wins, as in any JSON object.
                    fields.retain(|(k, _)| *k != key);
                    fields.push((key, value));
                }
            }
        }

        Ok(Negotiation {
            kind: kind.ok_or_else(|| de::Error::missing_field("type"))?,
            to: to.ok_or_else(|| de::Error::missing_field("to"))?,
            from,
            fields,
        })
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A control message.
    Signal(SignalMessage),
    /// A negotiation message to be routed to another participant.
    Negotiation(Negotiation),
}

/// Just the `type` tag, used to pick the concrete message shape.
#[derive(Deserialize)]
struct Tag {
    #[serde(rename = "type")]
    kind: String,
}

/// Decodes a text frame.
///
/// # Errors
///
/// Returns [`ProtoError::Json`] if the frame is not a JSON object with a
/// string `type` and the fields that type requires, or
/// [`ProtoError::UnknownType`] if the tag is not recognised.
pub fn decode(text: &str) -> Result<Inbound, ProtoError> {
    let tag: Tag = serde_json::from_str(text)?;
    match tag.kind.as_str() {
        "offer" | "answer" | "ice" => Ok(Inbound::Negotiation(serde_json::from_str(text)?)),
        "join" | "your-id" | "new-peer" | "existing-peers" | "peer-left" => {
            Ok(Inbound::Signal(serde_json::from_str(text)?))
        }
        _ => Err(ProtoError::UnknownType(tag.kind)),
    }
}

/// Encodes a control message as a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtoError::Json`] if serialization fails.
pub fn encode(msg: &SignalMessage) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(msg)?)
}

/// Encodes a negotiation message as a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtoError::Json`] if serialization fails.
pub fn encode_negotiation(msg: &Negotiation) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(msg)?)
}
