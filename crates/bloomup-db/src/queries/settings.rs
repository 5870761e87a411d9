//! Database query functions for the `settings` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::Setting;

/// Fetch a single setting value for a user.
pub async fn get_setting(pool: &SqlitePool, user_id: &str, key: &str) -> Result<Option<String>> {
    let value: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE user_id = ?1 AND key = ?2")
            .bind(user_id)
            .bind(key)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("failed to fetch setting {key} for user {user_id}"))?;

    Ok(value.map(|(v,)| v))
}

/// List every setting stored for a user, ordered by key.
pub async fn list_settings(pool: &SqlitePool, user_id: &str) -> Result<Vec<Setting>> {
    let rows = sqlx::query_as::<_, Setting>(
        "SELECT * FROM settings WHERE user_id = ?1 ORDER BY key",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list settings for user {user_id}"))?;

    Ok(rows)
}

/// Insert or overwrite a setting.
pub async fn upsert_setting(pool: &SqlitePool, user_id: &str, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (user_id, key, value, updated_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (user_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("failed to write setting {key} for user {user_id}"))?;

    Ok(())
}

/// Insert or overwrite several settings in one transaction.
///
/// Either every pair is written or none is.
pub async fn upsert_settings(pool: &SqlitePool, user_id: &str, pairs: &[(&str, &str)]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let now = Utc::now();

    for (key, value) in pairs {
        sqlx::query(
            "INSERT INTO settings (user_id, key, value, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (user_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to write setting {key} for user {user_id}"))?;
    }

    tx.commit().await.context("failed to commit settings")?;
    Ok(())
}
