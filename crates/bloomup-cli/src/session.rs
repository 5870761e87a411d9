//! Opening the database and the entitlement store for a command.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use bloomup_core::entitlement::{EntitlementStore, SqliteKeyValueStore, SystemClock};
use bloomup_db::pool;

use crate::config::BloomupConfig;

/// A database pool plus the entitlement store for the configured user.
pub struct Session {
    pub pool: SqlitePool,
    pub entitlements: Arc<EntitlementStore>,
}

impl Session {
    /// Connect, apply pending migrations, and load the user's entitlement.
    pub async fn open(config: &BloomupConfig) -> Result<Self> {
        pool::ensure_database_exists(&config.db_config).await?;
        let pool = pool::create_pool(&config.db_config).await?;
        pool::run_migrations(&pool).await?;

        let kv = Arc::new(SqliteKeyValueStore::new(pool.clone(), &config.user_id));
        let entitlements = EntitlementStore::open(kv, Arc::new(SystemClock))
            .await
            .with_context(|| format!("failed to load entitlement for user {}", config.user_id))?;

        tracing::debug!(user = %config.user_id, "session opened");
        Ok(Self {
            pool,
            entitlements: Arc::new(entitlements),
        })
    }

    pub async fn close(self) {
        drop(self.entitlements);
        self.pool.close().await;
    }
}
