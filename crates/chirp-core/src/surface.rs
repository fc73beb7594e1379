//! Capability traits for the platform a conversation lives on.
//!
//! The pipeline never sees a wire format; it consumes these two narrow
//! capabilities plus the [`Incoming`] record a transport hands it.

use chirp_memory::ConversationMeta;

/// Typed error for surface operations.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// Underlying platform request failure.
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Catch-all for surface-specific errors.
    #[error("{0}")]
    Other(String),
}

/// One inbound platform message, carrying as much identity as the
/// transport already knows. Absent fields are resolved through
/// [`Directory`] lookups on demand.
#[derive(Clone, Debug, Default)]
pub struct Incoming {
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub channel_name: Option<String>,
    pub author_id: String,
    pub author_name: Option<String>,
    pub author_nick: Option<String>,
    pub content: String,
    /// The bot itself is mentioned in the message.
    pub mentions_me: bool,
    /// The message was authored by the bot itself.
    pub from_me: bool,
}

impl Incoming {
    /// Group conversations are the ones with a guild; everything else is
    /// treated as a direct message.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.guild_id.is_some()
    }
}

/// Identity lookups against the platform.
pub trait Directory: Send + Sync {
    /// Display name of a user, if the platform knows one.
    fn display_name(&self, user_id: &str) -> impl Future<Output = Option<String>> + Send;

    /// Name of a channel, if the platform knows one.
    fn channel_name(&self, channel_id: &str) -> impl Future<Output = Option<String>> + Send;

    /// Name of a guild, if the platform knows one.
    fn guild_name(&self, guild_id: &str) -> impl Future<Output = Option<String>> + Send;

    /// Whether the channel is flagged as permitting restricted content.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be queried.
    fn allows_restricted(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<bool, SurfaceError>> + Send;
}

/// Message mutation against the platform.
pub trait Messenger: Send + Sync {
    /// Send a new message, returning its platform id.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the send.
    fn send_message(
        &self,
        channel_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<String, SurfaceError>> + Send;

    /// Replace the content of a previously sent message.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the edit.
    fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), SurfaceError>> + Send;

    /// Show a typing indicator. No-op by default.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the request.
    fn send_typing(&self, _channel_id: &str) -> impl Future<Output = Result<(), SurfaceError>> + Send {
        async { Ok(()) }
    }
}

/// Resolve a speaker's display name: nickname, then profile name, then a
/// directory lookup, then the raw id.
pub async fn resolve_display_name<D: Directory>(
    dir: &D,
    nick: Option<&str>,
    name: Option<&str>,
    user_id: &str,
) -> String {
    if let Some(nick) = nick {
        return nick.to_owned();
    }
    if let Some(name) = name {
        return name.to_owned();
    }
    if let Some(name) = dir.display_name(user_id).await {
        return name;
    }
    user_id.to_owned()
}

/// Build the denormalized record identity for a conversation, consulting
/// the directory only for what the inbound event does not already carry.
pub async fn conversation_meta<D: Directory>(dir: &D, msg: &Incoming) -> ConversationMeta {
    let channel_name = if let Some(name) = &msg.channel_name {
        name.clone()
    } else if msg.is_group() {
        dir.channel_name(&msg.channel_id)
            .await
            .unwrap_or_else(|| msg.channel_id.clone())
    } else {
        // Direct conversations are named after the peer.
        if let Some(name) = &msg.author_name {
            name.clone()
        } else if let Some(name) = dir.channel_name(&msg.channel_id).await {
            name
        } else if let Some(name) = dir.display_name(&msg.author_id).await {
            name
        } else {
            msg.channel_id.clone()
        }
    };

    match &msg.guild_id {
        Some(guild_id) => {
            let guild_name = dir
                .guild_name(guild_id)
                .await
                .unwrap_or_else(|| guild_id.clone());
            ConversationMeta::group(&msg.channel_id, channel_name, guild_id, guild_name)
        }
        None => ConversationMeta::direct(&msg.channel_id, channel_name),
    }
}
