//! Discord surface: gateway listener for inbound messages, REST client for
//! the outbound capabilities.

pub mod gateway;
pub mod rest;

use std::sync::Arc;

use tokio::sync::mpsc;

use chirp_core::surface::{Directory, Incoming, Messenger, SurfaceError};

use crate::markdown::utf8_chunks;

const MAX_MESSAGE_LEN: usize = 2000;

/// Outbound half of the Discord adapter. Cheap to clone; clones share the
/// underlying REST client.
#[derive(Clone, Debug)]
pub struct DiscordSurface {
    rest: Arc<rest::RestClient>,
}

impl DiscordSurface {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            rest: Arc::new(rest::RestClient::new(token)),
        }
    }

    /// Connect the gateway listener and return the surface together with
    /// the inbound message stream.
    #[must_use]
    pub fn connect(token: String) -> (Self, mpsc::Receiver<Incoming>) {
        let rx = gateway::spawn_gateway(token.clone());
        (Self::new(token), rx)
    }
}

impl Directory for DiscordSurface {
    async fn display_name(&self, user_id: &str) -> Option<String> {
        match self.rest.user(user_id).await {
            Ok(user) => Some(user.global_name.unwrap_or(user.username)),
            Err(e) => {
                tracing::debug!("user lookup for {user_id} failed: {e}");
                None
            }
        }
    }

    async fn channel_name(&self, channel_id: &str) -> Option<String> {
        match self.rest.channel(channel_id).await {
            Ok(channel) => channel.name,
            Err(e) => {
                tracing::debug!("channel lookup for {channel_id} failed: {e}");
                None
            }
        }
    }

    async fn guild_name(&self, guild_id: &str) -> Option<String> {
        match self.rest.guild(guild_id).await {
            Ok(guild) => Some(guild.name),
            Err(e) => {
                tracing::debug!("guild lookup for {guild_id} failed: {e}");
                None
            }
        }
    }

    async fn allows_restricted(&self, channel_id: &str) -> Result<bool, SurfaceError> {
        let channel = self.rest.channel(channel_id).await?;
        Ok(channel.nsfw)
    }
}

impl Messenger for DiscordSurface {
    /// Send text, splitting anything over the platform cap; the id of the
    /// last chunk is returned so later edits target the live tail.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<String, SurfaceError> {
        let mut last_id = String::new();
        for chunk in utf8_chunks(text, MAX_MESSAGE_LEN) {
            let msg = self.rest.send_message(channel_id, chunk).await?;
            last_id = msg.id;
        }
        Ok(last_id)
    }

    /// Edit the tracked message; overflow beyond the cap continues in
    /// follow-up messages.
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), SurfaceError> {
        let mut chunks = utf8_chunks(text, MAX_MESSAGE_LEN).into_iter();
        if let Some(head) = chunks.next() {
            self.rest.edit_message(channel_id, message_id, head).await?;
        }
        for chunk in chunks {
            self.rest.send_message(channel_id, chunk).await?;
        }
        Ok(())
    }

    async fn send_typing(&self, channel_id: &str) -> Result<(), SurfaceError> {
        self.rest.trigger_typing(channel_id).await?;
        Ok(())
    }
}

/// Strip the bot's own mention and rewrite everyone else's to `@name`.
#[must_use]
pub fn rewrite_mentions(content: &str, self_id: &str, mentions: &[(String, String)]) -> String {
    let mut out = content.to_owned();
    for (id, name) in mentions {
        let replacement = if !self_id.is_empty() && id == self_id {
            String::new()
        } else {
            format!("@{name}")
        };
        out = out
            .replace(&format!("<@!{id}>"), &replacement)
            .replace(&format!("<@{id}>"), &replacement);
    }
    out.trim().to_owned()
}
