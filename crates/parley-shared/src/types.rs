use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::PortablePublicKey;

// User identity = opaque stable id issued by the HTTP collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one chat channel; parameterizes the transport URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChatUuid(pub Uuid);

impl ChatUuid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-peer presence status as received on the wire.
///
/// `StayingAlive` is a re-announcement from a peer that was already
/// connected before we joined; it never represents a new join.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PresenceStatus {
    Connected,
    StayingAlive,
    Disconnected,
}

impl PresenceStatus {
    /// Whether this status counts as "present" for the aggregate view.
    pub fn is_present(self) -> bool {
        matches!(self, Self::Connected | Self::StayingAlive)
    }
}

/// Derived chat-wide status: `Active` iff at least one other peer is
/// present. Never stored per peer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AggregateStatus {
    Active,
    Inactive,
}

/// One known peer: identity, display name, key, and last seen status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub user_id: UserId,
    pub user_name: String,
    pub public_key: PortablePublicKey,
    pub status: PresenceStatus,
}
