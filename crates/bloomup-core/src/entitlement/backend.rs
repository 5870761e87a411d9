//! Durable key/value surfaces the entitlement store writes through to.
//!
//! The store only ever reads and writes three scalar values under fixed
//! keys.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use bloomup_db::queries::settings;

/// A per-user key/value surface.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several pairs. Implementations that can do so atomically
    /// should override this.
    async fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        for (key, value) in pairs {
            self.set(key, value).await?;
        }
        Ok(())
    }
}

// Compile-time assertion: KeyValueStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn KeyValueStore) {}
};

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Settings rows for one user in the SQLite `settings` table.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
    user_id: String,
}

impl SqliteKeyValueStore {
    pub fn new(pool: SqlitePool, user_id: impl Into<String>) -> Self {
        Self {
            pool,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        settings::get_setting(&self.pool, &self.user_id, key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        settings::upsert_setting(&self.pool, &self.user_id, key, value).await
    }

    async fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        settings::upsert_settings(&self.pool, &self.user_id, pairs).await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local storage; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `pairs`.
    pub fn with_values<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let mut values = self.values.lock().await;
        for (key, value) in pairs {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_get_set() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn memory_store_set_many() {
        let store = MemoryKeyValueStore::with_values([("a", "1")]);
        store.set_many(&[("a", "2"), ("b", "3")]).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn store_usable_as_trait_object() {
        let store: Box<dyn KeyValueStore> = Box::new(MemoryKeyValueStore::new());
        store.set_many(&[("x", "y")]).await.unwrap();
        assert_eq!(store.get("x").await.unwrap().as_deref(), Some("y"));
    }
}
