//! Client-side secure group-messaging session core.
//!
//! A session owns one duplex WebSocket to a chat channel and keeps
//! three pieces of state consistent across disconnects: the peer
//! presence ledger, the shared group key, and the reconciled message
//! stream. The UI collaborator talks to it exclusively through a
//! [`SessionHandle`]: `connect`, `disconnect`, `send_message_to_user`,
//! plus reactive watch channels for messages, connections and the
//! aggregate status.

pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod group_key;
pub mod identity;
pub mod messages;
pub mod presence;
pub mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{spawn_session, ConnectionsSnapshot, SessionCommand, SessionHandle};
