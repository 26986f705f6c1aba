//! Key/value repositories for broker state
//!
//! [`MemoryStore`] keeps values for the process lifetime. [`SqliteStore`]
//! persists JSON-encoded values in a namespaced table.

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::marker::PhantomData;
use tokio::sync::RwLock;

use crate::error::Result;

/// Repository interface
#[async_trait]
pub trait Store<V>: Send + Sync
where
    V: Send + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>>;
    async fn put(&self, key: &str, value: V) -> Result<()>;
    /// Remove and return the previous value
    async fn delete(&self, key: &str) -> Result<Option<V>>;
}

/// In-memory store guarded by a lock
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl<V> Store<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: V) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<Option<V>> {
        Ok(self.entries.write().await.remove(key))
    }
}

/// Run schema migrations
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// SQLite-backed store, one namespace per value type
pub struct SqliteStore<V> {
    pool: SqlitePool,
    namespace: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for SqliteStore<V> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            namespace: self.namespace.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V> SqliteStore<V> {
    pub fn new(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<V> Store<V> for SqliteStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value
            FROM kv_entries
            WHERE namespace = ? AND key = ?
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: V) -> Result<()> {
        let encoded = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT INTO kv_entries (namespace, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (namespace, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(encoded)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<Option<V>> {
        let previous = self.get(key).await?;

        sqlx::query(
            r#"
            DELETE FROM kv_entries
            WHERE namespace = ? AND key = ?
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use sqlx::sqlite::SqlitePoolOptions;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    fn record(name: &str, count: u32) -> Record {
        Record {
            name: name.to_string(),
            count,
        }
    }

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        migrate(&pool).await.expect("Failed to run migrations");
        pool
    }

    #[tokio::test]
    async fn test_memory_store_put_get_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.put("a", record("a", 1)).await.unwrap();
        store.put("a", record("a", 2)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(record("a", 2)));
        assert_eq!(store.len().await, 1);

        assert_eq!(store.delete("a").await.unwrap(), Some(record("a", 2)));
        assert_eq!(store.delete("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_upsert() {
        let store = SqliteStore::new(pool().await, "records");

        store.put("k", record("first", 1)).await.unwrap();
        store.put("k", record("second", 2)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(record("second", 2)));
    }

    #[tokio::test]
    async fn test_sqlite_store_namespaces_are_isolated() {
        let pool = pool().await;
        let left: SqliteStore<Record> = SqliteStore::new(pool.clone(), "left");
        let right: SqliteStore<Record> = SqliteStore::new(pool, "right");

        left.put("shared", record("l", 1)).await.unwrap();

        assert_eq!(right.get("shared").await.unwrap(), None);
        assert_eq!(left.get("shared").await.unwrap(), Some(record("l", 1)));
    }

    #[tokio::test]
    async fn test_sqlite_store_delete_returns_previous() {
        let store = SqliteStore::new(pool().await, "records");
        store.put("k", record("x", 9)).await.unwrap();

        assert_eq!(store.delete("k").await.unwrap(), Some(record("x", 9)));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stores_behind_trait_object() {
        let stores: Vec<Box<dyn Store<Record>>> = vec![
            Box::new(MemoryStore::new()),
            Box::new(SqliteStore::new(pool().await, "records")),
        ];

        for store in stores {
            store.put("id", record("dyn", 3)).await.unwrap();
            assert_eq!(store.get("id").await.unwrap().unwrap().count, 3);
        }
    }
}
