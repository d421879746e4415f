//! HTTP collaborator: issues user ids and chat channel ids.

use serde::Deserialize;
use uuid::Uuid;

use parley_shared::types::{ChatUuid, UserId};

use crate::error::ApiError;

/// Responses arrive wrapped in the same `{"data": ..}` envelope the
/// socket uses.
#[derive(Debug, Deserialize)]
struct ApiData<T> {
    data: T,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Ask the server for a fresh opaque user id.
    pub async fn fetch_user_id(&self) -> Result<UserId, ApiError> {
        let url = format!("{}/v1/user/uuid", self.base_url);
        let body: ApiData<String> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(UserId(body.data))
    }

    /// Ask the server to allocate a new chat channel.
    pub async fn fetch_chat_uuid(&self) -> Result<ChatUuid, ApiError> {
        let url = format!("{}/v1/chat/uuid", self.base_url);
        let body: ApiData<String> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ChatUuid(Uuid::parse_str(&body.data)?))
    }
}
