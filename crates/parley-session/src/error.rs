use thiserror::Error;

use parley_shared::error::{CryptoError, ProtocolError};

/// Failures inside one session. None of these terminate the process;
/// each degrades to a visible-but-continuing state (placeholder text,
/// dropped frame, resync, or a scheduled reconnect).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No group key established yet")]
    MissingGroupKey,

    #[error("Identity bootstrap failed: {0}")]
    IdentityBootstrap(String),
}

/// Failures talking to the HTTP collaborator.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid chat uuid in response: {0}")]
    InvalidChatUuid(#[from] uuid::Error),
}
