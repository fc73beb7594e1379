//! Terminal surface: replies print to stdout, identity lookups are inert,
//! and nothing is ever flagged as permitting restricted content.

use chirp_core::surface::{Directory, Messenger, SurfaceError};

#[derive(Clone, Copy, Debug, Default)]
pub struct CliSurface;

impl Directory for CliSurface {
    async fn display_name(&self, _user_id: &str) -> Option<String> {
        None
    }

    async fn channel_name(&self, _channel_id: &str) -> Option<String> {
        None
    }

    async fn guild_name(&self, _guild_id: &str) -> Option<String> {
        None
    }

    async fn allows_restricted(&self, _channel_id: &str) -> Result<bool, SurfaceError> {
        Ok(false)
    }
}

impl Messenger for CliSurface {
    async fn send_message(&self, _channel_id: &str, text: &str) -> Result<String, SurfaceError> {
        println!("{text}");
        Ok("0".into())
    }

    /// The terminal has no message to converge; edits are no-ops.
    async fn edit_message(
        &self,
        _channel_id: &str,
        _message_id: &str,
        _text: &str,
    ) -> Result<(), SurfaceError> {
        Ok(())
    }
}
