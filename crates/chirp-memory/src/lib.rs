//! SQLite-backed conversation records: append-only history plus a mutable
//! context-window size.

pub mod error;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::ContextStore;
pub use types::ConversationMeta;
