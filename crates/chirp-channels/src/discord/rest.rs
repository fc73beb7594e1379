//! Discord REST client for message operations and identity lookups.

use serde::{Deserialize, Serialize};

const BASE_URL: &str = "https://discord.com/api/v10";

pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GuildInfo {
    pub name: String,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    content: &'a str,
}

impl RestClient {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            client: chirp_core::http::default_client(),
            base_url: BASE_URL.to_owned(),
            token,
        }
    }

    /// Point the client at a non-default API host (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP request fails.
    pub async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<MessageRef, reqwest::Error> {
        self.client
            .post(format!("{}/channels/{channel_id}/messages", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&MessageBody { content })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP request fails.
    pub async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), reqwest::Error> {
        self.client
            .patch(format!(
                "{}/channels/{channel_id}/messages/{message_id}",
                self.base_url
            ))
            .header("Authorization", self.auth_header())
            .json(&MessageBody { content })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP request fails.
    pub async fn trigger_typing(&self, channel_id: &str) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/channels/{channel_id}/typing", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP request fails.
    pub async fn channel(&self, channel_id: &str) -> Result<ChannelInfo, reqwest::Error> {
        self.client
            .get(format!("{}/channels/{channel_id}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP request fails.
    pub async fn user(&self, user_id: &str) -> Result<UserInfo, reqwest::Error> {
        self.client
            .get(format!("{}/users/{user_id}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP request fails.
    pub async fn guild(&self, guild_id: &str) -> Result<GuildInfo, reqwest::Error> {
        self.client
            .get(format!("{}/guilds/{guild_id}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
