//! `bloomup status`, `bloomup tier`, and `bloomup styles`.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use bloomup_core::entitlement::{EntitlementSnapshot, EntitlementStore, Tier};
use bloomup_core::presets::load_presets;
use bloomup_db::queries::settings;

/// Print tier and today's usage; with `raw`, also the stored rows behind them.
pub async fn run_status(
    store: &EntitlementStore,
    pool: &SqlitePool,
    user_id: &str,
    raw: bool,
) -> Result<()> {
    let snapshot = store
        .snapshot()
        .await
        .context("failed to read entitlement")?;
    println!("User: {user_id}");
    print_snapshot(&snapshot);

    if raw {
        let rows = settings::list_settings(pool, user_id).await?;
        println!();
        println!("{:<20} {:<12} UPDATED", "KEY", "VALUE");
        for row in rows {
            println!(
                "{:<20} {:<12} {}",
                row.key,
                row.value,
                row.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

/// Change the tier and print the result.
pub async fn run_tier(store: &EntitlementStore, tier: &str) -> Result<()> {
    let tier: Tier = tier.parse()?;
    store
        .set_tier(tier)
        .await
        .context("failed to update tier")?;
    println!("Tier set to {tier}.");
    let snapshot = store.snapshot().await.context("failed to read entitlement")?;
    print_snapshot(&snapshot);
    Ok(())
}

/// List the built-in style presets.
pub fn run_styles() {
    let presets = load_presets();
    println!("{:<16} {:<16} DESCRIPTION", "ID", "NAME");
    for preset in presets {
        println!("{:<16} {:<16} {}", preset.id, preset.name, preset.description);
    }
}

fn print_snapshot(snapshot: &EntitlementSnapshot) {
    println!("Tier: {}", snapshot.tier);
    match snapshot.daily_limit {
        Some(limit) => println!("Used today: {}/{limit}", snapshot.used_today),
        None => println!("Used today: {}", snapshot.used_today),
    }
    println!("Remaining: {}", snapshot.remaining);
    if !snapshot.last_reset_date.is_empty() {
        println!("Day: {}", snapshot.last_reset_date);
    }
}
