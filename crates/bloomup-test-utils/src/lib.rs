//! Shared test utilities for BloomUp integration tests.
//!
//! Each test gets its own SQLite database file inside a temporary
//! directory, with migrations applied. Dropping the returned [`TempDir`]
//! removes the file.

use sqlx::SqlitePool;
use tempfile::TempDir;

use bloomup_db::config::DbConfig;
use bloomup_db::pool;

/// Create a temporary database with migrations applied.
///
/// Returns `(pool, dir)`. Keep `dir` alive for as long as the pool is in
/// use; pass both to [`drop_test_db`] when the test is done.
pub async fn create_test_db() -> (SqlitePool, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir for test database");
    let path = dir.path().join("bloomup_test.db");
    let config = DbConfig::new(format!("sqlite://{}?mode=rwc", path.display()));

    let pool = pool::create_pool(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to open test database at {}: {e}", path.display()));

    pool::run_migrations(&pool)
        .await
        .expect("migrations should succeed");

    (pool, dir)
}

/// Close the pool and remove the temporary database.
pub async fn drop_test_db(pool: SqlitePool, dir: TempDir) {
    pool.close().await;
    drop(dir);
}
