//! Durable key-value store on SQLite.

use crate::kv::{KeyValueStore, StoreError, WriteBatch, WriteOp};
use async_trait::async_trait;
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "opened sqlite store");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value: Option<String> = conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| row.get(0))
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.set(key, value);
        self.apply(batch).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.remove(key);
        self.apply(batch).await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for op in batch.ops() {
                    match op {
                        WriteOp::Set { key, value } => {
                            tx.execute(
                                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                                [key, value],
                            )?;
                        }
                        WriteOp::Remove { key } => {
                            tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
                        }
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_remove() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert_eq!(store.get("users").await.unwrap(), None);

        store.set("users", "[]").await.unwrap();
        store.set("users", "[\"alice\"]").await.unwrap();
        assert_eq!(store.get("users").await.unwrap().as_deref(), Some("[\"alice\"]"));

        store.remove("users").await.unwrap();
        store.remove("users").await.unwrap();
        assert_eq!(store.get("users").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_batch_applies_all() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut batch = WriteBatch::new();
        batch.set("a", "1").set("b", "2").remove("a");
        store.apply(batch).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("users", "[]").await.unwrap();
        store
            .conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_bad BEFORE INSERT ON kv
                     WHEN NEW.key = 'labels/bad/2.png'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let mut batch = WriteBatch::new();
        batch
            .set("labels/bad/1.png", "one")
            .remove("users")
            .set("labels/bad/2.png", "two")
            .set("labels/bad/3.png", "three");
        assert!(matches!(store.apply(batch).await, Err(StoreError::Sqlite(_))));

        assert_eq!(store.get("labels/bad/1.png").await.unwrap(), None);
        assert_eq!(store.get("labels/bad/3.png").await.unwrap(), None);
        assert_eq!(store.get("users").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("faces.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.set("labels/alice/1.png", "data:image/png;base64,AA==").await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(
            store.get("labels/alice/1.png").await.unwrap().as_deref(),
            Some("data:image/png;base64,AA==")
        );
    }
}
