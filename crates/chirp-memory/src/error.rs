//! Error types for chirp-memory.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Schema migration failure at open time.
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Stored history column does not decode as a message list.
    #[error("history decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}
