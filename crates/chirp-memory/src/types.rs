use serde::{Deserialize, Serialize};

/// Identity of one conversation plus the display names denormalized into
/// its record at creation time. Names are cached once and never refreshed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    /// Stable conversation identifier (the platform channel id).
    pub id: String,
    pub channel_name: String,
    pub guild_id: Option<String>,
    pub guild_name: String,
}

impl ConversationMeta {
    /// A direct (non-group) conversation.
    #[must_use]
    pub fn direct(id: impl Into<String>, channel_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_name: channel_name.into(),
            guild_id: None,
            guild_name: "direct message".into(),
        }
    }

    /// A group conversation inside a guild.
    #[must_use]
    pub fn group(
        id: impl Into<String>,
        channel_name: impl Into<String>,
        guild_id: impl Into<String>,
        guild_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_name: channel_name.into(),
            guild_id: Some(guild_id.into()),
            guild_name: guild_name.into(),
        }
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        self.guild_id.is_some()
    }
}
