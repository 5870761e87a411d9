//! Configuration file management for bloomup.
//!
//! Provides a TOML-based config file at `~/.config/bloomup/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use bloomup_core::locator::{DeniedLocation, FixedLocation, LocationProvider, UnavailableLocation};
use bloomup_core::synthesis::{Coordinates, GeminiClient, GeminiConfig};
use bloomup_db::config::DbConfig;

/// Env var holding the Gemini API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Env var selecting the user whose entitlement is used.
pub const USER_ENV: &str = "BLOOMUP_USER";
/// User id when none is configured.
pub const DEFAULT_USER: &str = "local";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub gemini: GeminiSection,
    #[serde(default)]
    pub user: UserSection,
    #[serde(default)]
    pub location: LocationSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GeminiSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_model: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// `false` behaves like a denied location permission.
    #[serde(default = "default_allow")]
    pub allow: bool,
}

fn default_allow() -> bool {
    true
}

impl Default for LocationSection {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            allow: true,
        }
    }
}

impl LocationSection {
    /// The location source this section describes.
    pub fn provider(&self) -> Arc<dyn LocationProvider> {
        if !self.allow {
            return Arc::new(DeniedLocation);
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Arc::new(FixedLocation(Coordinates::new(lat, lon))),
            _ => Arc::new(UnavailableLocation),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the bloomup config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/bloomup` or `~/.config/bloomup`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("bloomup");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("bloomup")
}

/// Return the path to the bloomup config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix, since the file holds an API key.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct BloomupConfig {
    pub db_config: DbConfig,
    pub user_id: String,
    /// `None` when no API key is configured anywhere.
    pub gemini: Option<GeminiConfig>,
    pub location: LocationSection,
}

impl BloomupConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `BLOOMUP_DATABASE_URL` > `database.url` > [`DbConfig::default_url`]
    /// - User: `cli_user` > `BLOOMUP_USER` > `user.id` > `"local"`
    /// - API key: `GEMINI_API_KEY` > `gemini.api_key` > none
    pub fn resolve(cli_db_url: Option<&str>, cli_user: Option<&str>) -> Result<Self> {
        let file_config = match load_config() {
            Ok(cfg) => cfg,
            Err(e) => {
                if config_path().exists() {
                    return Err(e);
                }
                ConfigFile::default()
            }
        };

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(url) = file_config.database.url.clone() {
            url
        } else {
            DbConfig::default_url()
        };

        let user_id = if let Some(user) = cli_user {
            user.to_string()
        } else if let Ok(user) = std::env::var(USER_ENV) {
            user
        } else if let Some(user) = file_config.user.id.clone() {
            user
        } else {
            DEFAULT_USER.to_string()
        };
        if user_id.trim().is_empty() {
            bail!("user id must not be empty");
        }

        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| file_config.gemini.api_key.clone())
            .filter(|key| !key.trim().is_empty());

        let gemini = api_key.map(|key| {
            let mut cfg = GeminiConfig::new(key);
            let section = &file_config.gemini;
            if let Some(url) = &section.base_url {
                cfg.base_url = url.clone();
            }
            if let Some(model) = &section.image_model {
                cfg.image_model = model.clone();
            }
            if let Some(model) = &section.plan_model {
                cfg.plan_model = model.clone();
            }
            if let Some(model) = &section.search_model {
                cfg.search_model = model.clone();
            }
            cfg
        });

        Ok(Self {
            db_config: DbConfig::new(db_url),
            user_id,
            gemini,
            location: file_config.location,
        })
    }

    /// Build the remote client. Only commands that call the API need this.
    pub fn gemini_client(&self) -> Result<GeminiClient> {
        let Some(cfg) = &self.gemini else {
            bail!(
                "Gemini API key not found; set {API_KEY_ENV} or run `bloomup init --api-key <key>`"
            );
        };
        GeminiClient::new(cfg.clone()).context("failed to build Gemini client")
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
