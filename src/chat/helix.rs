use serde::Deserialize;
use serde_json::json;

use super::auth;
use super::error::{ChatError, Result};

const USERS_URL: &str = "https://api.twitch.tv/helix/users";
const MODERATION_BANS_URL: &str = "https://api.twitch.tv/helix/moderation/bans";
const MODERATION_CHAT_URL: &str = "https://api.twitch.tv/helix/moderation/chat";
const SHIELD_MODE_URL: &str = "https://api.twitch.tv/helix/moderation/shield_mode";
const CHAT_SETTINGS_URL: &str = "https://api.twitch.tv/helix/chat/settings";

/// User info response
#[derive(Debug, Clone, Deserialize)]
pub struct UsersResponse {
    pub data: Vec<UserData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserData {
    pub id: String,
    pub login: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ShieldModeResponse {
    data: Vec<ShieldModeData>,
}

#[derive(Debug, Clone, Deserialize)]
struct ShieldModeData {
    is_active: bool,
}

/// Authenticated REST client for the moderation/control surface. Every
/// moderation call carries both a broadcaster id and a moderator id: the
/// platform models a moderator acting on behalf of a broadcaster even
/// when the two are the same account.
pub struct HelixClient {
    client: reqwest::Client,
    access_token: String,
}

impl HelixClient {
    pub fn new(client: reqwest::Client, access_token: String) -> Self {
        Self {
            client,
            access_token,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Client-Id", auth::CLIENT_ID)
    }

    /// Turn a non-2xx response into an error carrying status and body.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ChatError::HttpError(format!(
            "HTTP {}: {}",
            status, error_text
        )))
    }

    /// Resolve a login name to its account record.
    pub async fn get_user_by_login(&self, login: &str) -> Result<UserData> {
        let url = format!("{}?login={}", USERS_URL, urlencoding::encode(login));
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let users = Self::check(response).await?.json::<UsersResponse>().await?;
        users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::HttpError(format!("User '{}' not found", login)))
    }

    /// Resolve the account the bearer token belongs to.
    pub async fn get_current_user(&self) -> Result<UserData> {
        let response = self.request(reqwest::Method::GET, USERS_URL).send().await?;
        let users = Self::check(response).await?.json::<UsersResponse>().await?;
        users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::AuthError("Failed to resolve authenticated user".to_string()))
    }

    /// Ban or timeout a user. `duration` present means a timeout for that
    /// many seconds; omitted entirely it is a permanent ban — the two are
    /// mutually exclusive on the wire.
    pub async fn ban_user(
        &self,
        broadcaster_id: &str,
        moderator_id: &str,
        user_id: &str,
        duration: Option<u32>,
    ) -> Result<()> {
        let url = format!(
            "{}?broadcaster_id={}&moderator_id={}",
            MODERATION_BANS_URL, broadcaster_id, moderator_id
        );
        let body = match duration {
            Some(seconds) => json!({ "data": { "user_id": user_id, "duration": seconds } }),
            None => json!({ "data": { "user_id": user_id } }),
        };

        let response = self
            .request(reqwest::Method::POST, &url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Lift a ban or timeout (one endpoint covers both).
    pub async fn unban_user(
        &self,
        broadcaster_id: &str,
        moderator_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let url = format!(
            "{}?broadcaster_id={}&moderator_id={}&user_id={}",
            MODERATION_BANS_URL, broadcaster_id, moderator_id, user_id
        );
        let response = self.request(reqwest::Method::DELETE, &url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Delete a single chat message.
    pub async fn delete_message(
        &self,
        broadcaster_id: &str,
        moderator_id: &str,
        message_id: &str,
    ) -> Result<()> {
        let url = format!(
            "{}?broadcaster_id={}&moderator_id={}&message_id={}",
            MODERATION_CHAT_URL, broadcaster_id, moderator_id, message_id
        );
        let response = self.request(reqwest::Method::DELETE, &url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Read the current shield-mode status.
    pub async fn get_shield_mode(&self, broadcaster_id: &str, moderator_id: &str) -> Result<bool> {
        let url = format!(
            "{}?broadcaster_id={}&moderator_id={}",
            SHIELD_MODE_URL, broadcaster_id, moderator_id
        );
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let shield = Self::check(response)
            .await?
            .json::<ShieldModeResponse>()
            .await?;
        shield
            .data
            .into_iter()
            .next()
            .map(|d| d.is_active)
            .ok_or_else(|| ChatError::HttpError("No shield mode status in response".to_string()))
    }

    /// Switch shield mode on or off.
    pub async fn set_shield_mode(
        &self,
        broadcaster_id: &str,
        moderator_id: &str,
        is_active: bool,
    ) -> Result<()> {
        let url = format!(
            "{}?broadcaster_id={}&moderator_id={}",
            SHIELD_MODE_URL, broadcaster_id, moderator_id
        );
        let response = self
            .request(reqwest::Method::PUT, &url)
            .header("Content-Type", "application/json")
            .json(&json!({ "is_active": is_active }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Patch chat settings (subscriber/emote/follower/slow modes) in one
    /// batched call.
    pub async fn update_chat_settings(
        &self,
        broadcaster_id: &str,
        moderator_id: &str,
        settings: serde_json::Value,
    ) -> Result<()> {
        let url = format!(
            "{}?broadcaster_id={}&moderator_id={}",
            CHAT_SETTINGS_URL, broadcaster_id, moderator_id
        );
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .header("Content-Type", "application/json")
            .json(&settings)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
