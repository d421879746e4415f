//! Session configuration.

use parley_shared::constants::MAX_RECONNECT_ATTEMPTS;
use parley_shared::types::{ChatUuid, UserId};

/// Everything a session needs to reach its collaborators. Defaults
/// target a local development server; `from_env` overrides them from
/// the environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the HTTP id-issuing service.
    pub api_base_url: String,
    /// Base URL of the WebSocket endpoint, without the chat path.
    pub ws_base_url: String,
    /// Display name announced in presence frames.
    pub user_name: String,
    /// Pre-assigned user id. When `None` the session asks the HTTP
    /// service for one on connect.
    pub user_id: Option<UserId>,
    /// Reconnect attempts before the session gives up and goes idle.
    pub max_reconnect_attempts: u32,
    /// Text shown in place of a message that failed to decrypt.
    pub decrypt_placeholder: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            ws_base_url: "ws://localhost:8080".to_string(),
            user_name: "Anonymous".to_string(),
            user_id: None,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            decrypt_placeholder: "Could not decrypt the message".to_string(),
        }
    }
}

impl SessionConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `PARLEY_API_URL`, `PARLEY_WS_URL`,
    /// `PARLEY_USER_NAME`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("PARLEY_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("PARLEY_WS_URL") {
            config.ws_base_url = url;
        }
        if let Ok(name) = std::env::var("PARLEY_USER_NAME") {
            config.user_name = name;
        }
        config
    }

    /// The WebSocket URL for one chat channel.
    pub fn chat_ws_url(&self, chat: &ChatUuid) -> String {
        format!("{}/ws/{}", self.ws_base_url, chat)
    }
}
