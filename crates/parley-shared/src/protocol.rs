//! Wire protocol for the chat WebSocket.
//!
//! Every frame is a JSON envelope `{ "data": { "<Kind>": { .. } } }`
//! with exactly one kind present. Timestamps travel as naive
//! second-precision ISO-8601 (`2023-10-01T12:34:56`); binary fields
//! (cipher, iv, encrypted key) travel as standard base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::PortablePublicKey;
use crate::error::ProtocolError;
use crate::types::{PresenceStatus, UserId};

/// All frames exchanged over the chat socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Frame {
    /// Encrypted chat message
    ChatMessage(ChatMessageFrame),

    /// Presence announcement (join / heartbeat / leave)
    Connection(ConnectionFrame),

    /// Current group key, encrypted for one specific peer
    GroupKey(GroupKeyFrame),

    /// Transport liveness probe
    Ping(PingFrame),
}

/// The outer envelope; every frame on the wire is wrapped in one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Frame,
}

/// A peer announcing its presence, carrying everything another side
/// needs to start talking to it: identity, display name, public key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionFrame {
    pub status: PresenceStatus,
    pub user_id: UserId,
    pub user_name: String,
    pub public_key: PortablePublicKey,
}

/// An encrypted chat message.
///
/// `uuid` and `message_sent_at` are assigned by the server: the client
/// sends both as `None` and receives them filled in on the echo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessageFrame {
    pub uuid: Option<String>,
    pub user_id: UserId,
    pub cipher: String,
    pub iv: String,
    pub message_sent_at: Option<NaiveDateTime>,
}

/// The current group key, exported raw and encrypted under the
/// pairwise key shared with exactly one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupKeyFrame {
    pub encrypted_key: String,
    pub iv: String,
    pub creation_date: NaiveDateTime,
    pub for_user_id: UserId,
    pub from_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingFrame {
    pub ping_type: Knock,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Knock {
    Ping,
    Pong,
}

impl Envelope {
    pub fn new(data: Frame) -> Self {
        Self { data }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Current UTC time truncated to whole seconds, the precision the wire
/// format carries.
pub fn now_seconds() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Standard-alphabet base64 for binary wire fields.
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_b64(encoded: &str, field: &'static str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(encoded)
        .map_err(|_| ProtocolError::InvalidBase64 { field })
}
