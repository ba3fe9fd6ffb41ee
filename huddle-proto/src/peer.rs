//! Participant identity types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Relay-assigned identity of a connected participant.
///
/// Identities are generated by the relay when a connection is accepted and
/// are never supplied by clients. On the wire they are plain strings, so a
/// client may address any string; unknown identities simply fail to route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generates a fresh identity from a time-ordered UUID v7.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity and display name of a joined participant, as listed in
/// `existing-peers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Relay-assigned identity.
    pub id: PeerId,
    /// Display name bound at join time.
    pub name: String,
}
