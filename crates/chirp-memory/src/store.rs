use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{Mutex, watch};

use chirp_llm::provider::Message;

use crate::error::StoreError;
use crate::types::ConversationMeta;

/// Persisted per-conversation records behind a single store-wide lock.
///
/// The lock is held for the duration of one field access or one composite
/// read-modify-write (`push_history`, `bump_window`), so no two writers on
/// the same field can race, while unrelated callers still interleave
/// between accesses.
#[derive(Debug)]
pub struct ContextStore {
    pool: SqlitePool,
    lock: Mutex<()>,
    changes: watch::Sender<u64>,
}

impl ContextStore {
    /// Open (or create) the SQLite database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        // An in-memory database exists per connection, so the pool must
        // not grow past one.
        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{path}?mode=rwc"), 5)
        };

        let opts = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let (changes, _) = watch::channel(0);
        Ok(Self {
            pool,
            lock: Mutex::new(()),
            changes,
        })
    }

    /// Counter bumped on every found-and-updated write. Creation and
    /// idempotent no-op writes do not tick it.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n += 1);
    }

    /// Insert the lazily-created record for a first touch. The caller holds
    /// the store lock and has already established the row is missing.
    async fn create_record(
        &self,
        meta: &ConversationMeta,
        history_json: &str,
        window_size: i64,
        active_agent: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversations \
             (id, channel_name, guild_id, guild_name, history, window_size, active_agent) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.id)
        .bind(&meta.channel_name)
        .bind(meta.guild_id.as_deref())
        .bind(&meta.guild_name)
        .bind(history_json)
        .bind(window_size)
        .bind(active_agent)
        .execute(&self.pool)
        .await?;
        tracing::debug!(conversation = %meta.id, "created conversation record");
        Ok(())
    }

    /// Full role-tagged history, oldest first. Missing records are created
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or an undecodable history column.
    pub async fn chat_history(
        &self,
        meta: &ConversationMeta,
    ) -> Result<Vec<Message>, StoreError> {
        let _guard = self.lock.lock().await;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT history FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((json,)) => Ok(serde_json::from_str(&json)?),
            None => {
                self.create_record(meta, "[]", 0, None).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Replace the stored history. Writing an identical value is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn set_chat_history(
        &self,
        meta: &ConversationMeta,
        history: &[Message],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(history)?;
        let _guard = self.lock.lock().await;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT history FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((old,)) if old == json => Ok(()),
            Some(_) => {
                sqlx::query("UPDATE conversations SET history = ? WHERE id = ?")
                    .bind(&json)
                    .bind(&meta.id)
                    .execute(&self.pool)
                    .await?;
                self.notify();
                Ok(())
            }
            None => self.create_record(meta, &json, 0, None).await,
        }
    }

    /// Number of trailing history turns considered in context.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn window_size(&self, meta: &ConversationMeta) -> Result<i64, StoreError> {
        let _guard = self.lock.lock().await;
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT window_size FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((size,)) => Ok(size),
            None => {
                self.create_record(meta, "[]", 0, None).await?;
                Ok(0)
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn set_window_size(
        &self,
        meta: &ConversationMeta,
        size: i64,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT window_size FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((old,)) if old == size => Ok(()),
            Some(_) => {
                sqlx::query("UPDATE conversations SET window_size = ? WHERE id = ?")
                    .bind(size)
                    .bind(&meta.id)
                    .execute(&self.pool)
                    .await?;
                self.notify();
                Ok(())
            }
            None => self.create_record(meta, "[]", size, None).await,
        }
    }

    /// Agent bound to this conversation, if one was ever assigned.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn active_agent(
        &self,
        meta: &ConversationMeta,
    ) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT active_agent FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((agent,)) => Ok(agent),
            None => {
                self.create_record(meta, "[]", 0, None).await?;
                Ok(None)
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn set_active_agent(
        &self,
        meta: &ConversationMeta,
        agent: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT active_agent FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((Some(old),)) if old == agent => Ok(()),
            Some(_) => {
                sqlx::query("UPDATE conversations SET active_agent = ? WHERE id = ?")
                    .bind(agent)
                    .bind(&meta.id)
                    .execute(&self.pool)
                    .await?;
                self.notify();
                Ok(())
            }
            None => self.create_record(meta, "[]", 0, Some(agent)).await,
        }
    }

    /// Append turns to the history, holding the store lock across the whole
    /// read-modify-write. History is append-only in steady state; trimming
    /// the context is a window operation, never a deletion.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or an undecodable history column.
    pub async fn push_history(
        &self,
        meta: &ConversationMeta,
        turns: &[Message],
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT history FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((json,)) => {
                let mut history: Vec<Message> = serde_json::from_str(&json)?;
                history.extend_from_slice(turns);
                let json = serde_json::to_string(&history)?;
                sqlx::query("UPDATE conversations SET history = ? WHERE id = ?")
                    .bind(&json)
                    .bind(&meta.id)
                    .execute(&self.pool)
                    .await?;
                self.notify();
                Ok(())
            }
            None => {
                let json = serde_json::to_string(turns)?;
                self.create_record(meta, &json, 0, None).await
            }
        }
    }

    /// Grow the context window by one turn, returning the new size. The
    /// store lock is held across the read-modify-write so concurrent bumps
    /// lose no increments.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn bump_window(&self, meta: &ConversationMeta) -> Result<i64, StoreError> {
        let _guard = self.lock.lock().await;
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT window_size FROM conversations WHERE id = ?")
                .bind(&meta.id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((old,)) => {
                let size = old + 1;
                sqlx::query("UPDATE conversations SET window_size = ? WHERE id = ?")
                    .bind(size)
                    .bind(&meta.id)
                    .execute(&self.pool)
                    .await?;
                self.notify();
                Ok(size)
            }
            None => {
                self.create_record(meta, "[]", 1, None).await?;
                Ok(1)
            }
        }
    }

    /// Forget the in-context view without touching the history.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn clear_context(&self, meta: &ConversationMeta) -> Result<(), StoreError> {
        self.set_window_size(meta, 0).await
    }

    /// The trailing `window_size` turns of history; empty when the window
    /// is zero. A window transiently larger than the history yields the
    /// whole history.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or an undecodable history column.
    pub async fn context(&self, meta: &ConversationMeta) -> Result<Vec<Message>, StoreError> {
        let size = self.window_size(meta).await?;
        if size <= 0 {
            return Ok(Vec::new());
        }
        let history = self.chat_history(meta).await?;
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        let skip = history.len().saturating_sub(size);
        Ok(history.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chirp_llm::provider::Message;

    async fn test_store() -> ContextStore {
        ContextStore::open(":memory:").await.unwrap()
    }

    fn meta(id: &str) -> ConversationMeta {
        ConversationMeta::group(id, "general", "g1", "guild")
    }

    #[tokio::test]
    async fn missing_record_created_with_defaults() {
        let store = test_store().await;
        let m = meta("ch1");

        assert!(store.chat_history(&m).await.unwrap().is_empty());
        assert_eq!(store.window_size(&m).await.unwrap(), 0);
        assert!(store.active_agent(&m).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_roundtrip() {
        let store = test_store().await;
        let m = meta("ch1");

        let turns = vec![
            Message::user("alice:hello", Some("alice".into())),
            Message::assistant("hi there", Some("neko".into())),
        ];
        store.set_chat_history(&m, &turns).await.unwrap();
        assert_eq!(store.chat_history(&m).await.unwrap(), turns);
    }

    #[tokio::test]
    async fn identical_write_notifies_once() {
        let store = test_store().await;
        let m = meta("ch1");
        store.window_size(&m).await.unwrap(); // create
        let rx = store.subscribe();

        store.set_window_size(&m, 4).await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        store.set_window_size(&m, 4).await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test]
    async fn create_on_miss_does_not_notify() {
        let store = test_store().await;
        let rx = store.subscribe();

        store.set_window_size(&meta("fresh"), 7).await.unwrap();
        assert_eq!(*rx.borrow(), 0);
        assert_eq!(store.window_size(&meta("fresh")).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn update_notifies() {
        let store = test_store().await;
        let m = meta("ch1");
        let rx = store.subscribe();

        store.window_size(&m).await.unwrap(); // create
        store.set_window_size(&m, 2).await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test]
    async fn push_history_appends_in_order() {
        let store = test_store().await;
        let m = meta("ch1");

        store
            .push_history(&m, &[Message::user("a:1", None)])
            .await
            .unwrap();
        store
            .push_history(&m, &[Message::assistant("2", None)])
            .await
            .unwrap();

        let history = store.chat_history(&m).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "a:1");
        assert_eq!(history[1].content, "2");
    }

    #[tokio::test]
    async fn context_is_trailing_window() {
        let store = test_store().await;
        let m = meta("ch1");

        let turns: Vec<Message> = (0..6)
            .map(|i| Message::user(format!("u:{i}"), None))
            .collect();
        store.set_chat_history(&m, &turns).await.unwrap();
        store.set_window_size(&m, 2).await.unwrap();

        let ctx = store.context(&m).await.unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].content, "u:4");
        assert_eq!(ctx[1].content, "u:5");
    }

    #[tokio::test]
    async fn context_view_matches_window_size() {
        let store = test_store().await;
        let m = meta("ch1");

        let turns: Vec<Message> = (0..10)
            .map(|i| Message::user(format!("u:{i}"), None))
            .collect();
        store.set_chat_history(&m, &turns).await.unwrap();

        for size in 0..=10 {
            store.set_window_size(&m, size).await.unwrap();
            let expected = usize::try_from(size).unwrap();
            assert_eq!(store.context(&m).await.unwrap().len(), expected);
        }
    }

    #[tokio::test]
    async fn oversized_window_yields_whole_history() {
        let store = test_store().await;
        let m = meta("ch1");

        store
            .set_chat_history(&m, &[Message::user("only", None)])
            .await
            .unwrap();
        store.set_window_size(&m, 50).await.unwrap();

        assert_eq!(store.context(&m).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_context_empties_view_but_keeps_history() {
        let store = test_store().await;
        let m = meta("ch1");

        store
            .push_history(&m, &[Message::user("a:1", None)])
            .await
            .unwrap();
        store.set_window_size(&m, 1).await.unwrap();
        store.clear_context(&m).await.unwrap();

        assert!(store.context(&m).await.unwrap().is_empty());
        assert_eq!(store.chat_history(&m).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bump_window_returns_new_size() {
        let store = test_store().await;
        let m = meta("ch1");

        assert_eq!(store.bump_window(&m).await.unwrap(), 1);
        assert_eq!(store.bump_window(&m).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_bumps_lose_no_increments() {
        let store = Arc::new(test_store().await);
        let m = meta("ch1");
        store.window_size(&m).await.unwrap(); // create first

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                store.bump_window(&m).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.window_size(&m).await.unwrap(), 16);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let store = test_store().await;

        store
            .push_history(&meta("a"), &[Message::user("in-a", None)])
            .await
            .unwrap();
        store
            .push_history(&meta("b"), &[Message::user("in-b", None)])
            .await
            .unwrap();

        assert_eq!(store.chat_history(&meta("a")).await.unwrap()[0].content, "in-a");
        assert_eq!(store.chat_history(&meta("b")).await.unwrap()[0].content, "in-b");
    }

    #[tokio::test]
    async fn active_agent_roundtrip() {
        let store = test_store().await;
        let m = meta("ch1");

        store.set_active_agent(&m, "neko").await.unwrap();
        assert_eq!(store.active_agent(&m).await.unwrap().as_deref(), Some("neko"));
    }

    #[tokio::test]
    async fn records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chirp.db");
        let path = path.to_str().unwrap();
        let m = meta("ch1");

        {
            let store = ContextStore::open(path).await.unwrap();
            store.set_active_agent(&m, "neko").await.unwrap();
            store.set_window_size(&m, 3).await.unwrap();
        }

        let store = ContextStore::open(path).await.unwrap();
        assert_eq!(store.active_agent(&m).await.unwrap().as_deref(), Some("neko"));
        assert_eq!(store.window_size(&m).await.unwrap(), 3);
    }
}
