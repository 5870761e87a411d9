use std::env;
use std::path::PathBuf;

/// Database configuration.
///
/// Reads from the `BLOOMUP_DATABASE_URL` environment variable, falling back
/// to a SQLite file under the platform data directory when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full SQLite connection URL (e.g. `sqlite:///home/me/.local/share/bloomup/bloomup.db?mode=rwc`).
    pub database_url: String,
}

impl DbConfig {
    /// Environment variable consulted by [`DbConfig::from_env`].
    pub const ENV_VAR: &str = "BLOOMUP_DATABASE_URL";

    /// File name of the default database.
    pub const DEFAULT_FILE_NAME: &str = "bloomup.db";

    /// The default connection URL used when no environment variable is set.
    ///
    /// `mode=rwc` lets SQLite create the file on first connect.
    pub fn default_url() -> String {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bloomup");
        format!(
            "sqlite://{}?mode=rwc",
            dir.join(Self::DEFAULT_FILE_NAME).display()
        )
    }

    /// Build a config from the environment.
    ///
    /// Priority: `BLOOMUP_DATABASE_URL` env var, then [`Self::default_url`].
    pub fn from_env() -> Self {
        let database_url = env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::default_url());
        Self { database_url }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Whether the URL points at an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    /// Extract the on-disk database path from the URL.
    ///
    /// Returns `None` for in-memory databases or URLs without a path.
    pub fn database_path(&self) -> Option<PathBuf> {
        if self.is_memory() {
            return None;
        }
        let rest = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))?;
        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
