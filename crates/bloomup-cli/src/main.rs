mod config;
mod redesign_cmd;
mod serve_cmd;
mod session;
mod status_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use bloomup_core::locator::{FixedLocation, LocationProvider, SupplierLocator};
use bloomup_core::orchestrator::Orchestrator;
use bloomup_core::synthesis::Coordinates;
use bloomup_db::pool;

use config::BloomupConfig;
use session::Session;

#[derive(Parser)]
#[command(name = "bloomup", about = "Outdoor-space redesign engine")]
struct Cli {
    /// Database URL (overrides BLOOMUP_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// User whose entitlement is used (overrides BLOOMUP_USER env var)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a bloomup config file (no database required)
    Init {
        /// Gemini API key
        #[arg(long)]
        api_key: Option<String>,
        /// SQLite connection URL
        #[arg(long)]
        db_url: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database file and run migrations
    DbInit,
    /// Show tier and today's usage
    Status {
        /// Also list the stored settings rows
        #[arg(long)]
        raw: bool,
    },
    /// Change the subscription tier (free or pro)
    Tier {
        /// New tier
        tier: String,
    },
    /// List the available style presets
    Styles,
    /// Redesign a photo of an outdoor space
    Redesign {
        /// Path to the source photo
        #[arg(long)]
        image: PathBuf,
        /// Style preset id (see `bloomup styles`)
        #[arg(long)]
        style: Option<String>,
        /// Where to write the generated image
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also look up nearby suppliers for the inventory
        #[arg(long)]
        suppliers: bool,
        /// Latitude for the supplier lookup (overrides config)
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Longitude for the supplier lookup (overrides config)
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Serve the JSON API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Execute the `bloomup init` command: write config file.
fn cmd_init(api_key: Option<String>, db_url: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.clone(),
        },
        gemini: config::GeminiSection {
            api_key: api_key.clone(),
            ..Default::default()
        },
        ..Default::default()
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    match db_url {
        Some(url) => println!("  database.url = {url}"),
        None => println!("  database.url = (default) {}", bloomup_db::config::DbConfig::default_url()),
    }
    match api_key {
        Some(key) if key.chars().count() > 8 => {
            let prefix: String = key.chars().take(4).collect();
            println!("  gemini.api_key = {prefix}...");
        }
        Some(_) => println!("  gemini.api_key = (set)"),
        None => println!("  gemini.api_key = (unset; export {})", config::API_KEY_ENV),
    }
    println!();
    println!("Next: run `bloomup db-init` to create the database.");

    Ok(())
}

/// Execute the `bloomup db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &BloomupConfig) -> anyhow::Result<()> {
    println!("Initializing bloomup database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("bloomup db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            api_key,
            db_url,
            force,
        } => {
            cmd_init(api_key, db_url, force)?;
        }
        Commands::Styles => {
            status_cmd::run_styles();
        }
        Commands::DbInit => {
            let resolved = BloomupConfig::resolve(cli.database_url.as_deref(), cli.user.as_deref())?;
            cmd_db_init(&resolved).await?;
        }
        Commands::Status { raw } => {
            let resolved = BloomupConfig::resolve(cli.database_url.as_deref(), cli.user.as_deref())?;
            let session = Session::open(&resolved).await?;
            let result =
                status_cmd::run_status(&session.entitlements, &session.pool, &resolved.user_id, raw)
                    .await;
            session.close().await;
            result?;
        }
        Commands::Tier { tier } => {
            let resolved = BloomupConfig::resolve(cli.database_url.as_deref(), cli.user.as_deref())?;
            let session = Session::open(&resolved).await?;
            let result = status_cmd::run_tier(&session.entitlements, &tier).await;
            session.close().await;
            result?;
        }
        Commands::Redesign {
            image,
            style,
            output,
            suppliers,
            lat,
            lon,
        } => {
            let resolved = BloomupConfig::resolve(cli.database_url.as_deref(), cli.user.as_deref())?;
            let client = resolved.gemini_client()?;
            let location: Arc<dyn LocationProvider> = match (lat, lon) {
                (Some(lat), Some(lon)) => Arc::new(FixedLocation(Coordinates::new(lat, lon))),
                _ => resolved.location.provider(),
            };
            let session = Session::open(&resolved).await?;
            let options = redesign_cmd::RedesignOptions {
                image,
                style,
                output,
                suppliers,
            };
            let result =
                redesign_cmd::run_redesign(session.entitlements.clone(), client, location, options)
                    .await;
            session.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = BloomupConfig::resolve(cli.database_url.as_deref(), cli.user.as_deref())?;
            let client = Arc::new(resolved.gemini_client()?);
            let session = Session::open(&resolved).await?;
            let state = serve_cmd::AppState {
                orchestrator: Orchestrator::new(session.entitlements.clone(), client.clone()),
                locator: Arc::new(SupplierLocator::new(client, resolved.location.provider())),
            };
            let result = serve_cmd::run_serve(state, &bind, port)
                .await
                .with_context(|| format!("failed to serve on {bind}:{port}"));
            session.close().await;
            result?;
        }
    }

    Ok(())
}
