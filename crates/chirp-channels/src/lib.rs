//! Surface implementations for the chirp responder.

pub mod cli;
pub mod discord;
pub mod markdown;

pub use cli::CliSurface;
pub use discord::DiscordSurface;
