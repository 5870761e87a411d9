//! Entitlement store: the single source of truth for tier and daily quota.
//!
//! State is loaded once from a [`KeyValueStore`], cached in memory behind an
//! async mutex, and written through on every mutation. The mutex serializes
//! [`EntitlementStore::try_consume`], [`EntitlementStore::set_tier`], and the
//! lazy day-rollover against concurrent callers within the process.
//!
//! ```text
//! read/consume --> lock --> rollover check (today != last_reset_date?)
//!                               |  yes: used_today = 0, last_reset_date = today (persisted)
//!                               v
//!                          quota decision --> persist --> update cache
//! ```

pub mod backend;
pub mod clock;

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tokio::sync::Mutex;

pub use backend::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use bloomup_db::models::Tier;
pub use clock::{Clock, ManualClock, SystemClock};

/// Redesigns a FREE user may complete per calendar day.
pub const FREE_DAILY_LIMIT: u32 = 2;

/// Persisted key holding the tier (`FREE` or `PRO`).
pub const TIER_KEY: &str = "bloomup_plan";
/// Persisted key holding the number of redesigns used today.
pub const USED_KEY: &str = "bloomup_attempts";
/// Persisted key holding the date `used_today` was last reset.
pub const LAST_DATE_KEY: &str = "bloomup_last_date";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors from entitlement operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntitlementError {
    #[error("daily limit of {limit} free redesigns reached")]
    QuotaExceeded { limit: u32 },

    #[error("failed to persist entitlement: {0}")]
    Persistence(String),
}

impl EntitlementError {
    fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }
}

/// The persisted quota/tier state for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub tier: Tier,
    pub used_today: u32,
    /// `YYYY-MM-DD`, or empty when never recorded.
    pub last_reset_date: String,
}

impl Entitlement {
    pub fn remaining(&self) -> Remaining {
        match self.tier {
            Tier::Free => Remaining::Limited(FREE_DAILY_LIMIT.saturating_sub(self.used_today)),
            Tier::Pro => Remaining::Unlimited,
        }
    }
}

/// Redesigns left today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Limited(u32),
    Unlimited,
}

impl Remaining {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Limited(0))
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Serializes as a number, or the string `"unlimited"`.
impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(n) => serializer.serialize_u32(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

/// A point-in-time view of the entitlement for display and gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementSnapshot {
    pub tier: Tier,
    pub used_today: u32,
    pub remaining: Remaining,
    /// `None` for tiers without a cap.
    pub daily_limit: Option<u32>,
    pub last_reset_date: String,
}

// ---------------------------------------------------------------------------
// EntitlementStore
// ---------------------------------------------------------------------------

/// Quota and tier for one user, persisted through a [`KeyValueStore`].
pub struct EntitlementStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<Entitlement>,
}

impl EntitlementStore {
    /// Load the entitlement from `kv`.
    ///
    /// Missing or malformed values fall back to FREE / 0 / never-reset, so a
    /// corrupted store never locks a user out.
    pub async fn open(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EntitlementError> {
        let tier = match kv.get(TIER_KEY).await.map_err(EntitlementError::persistence)? {
            Some(raw) => raw.parse::<Tier>().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "stored tier is malformed, treating as FREE");
                Tier::Free
            }),
            None => Tier::Free,
        };

        let used_today = match kv.get(USED_KEY).await.map_err(EntitlementError::persistence)? {
            Some(raw) => raw.trim().parse::<u32>().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "stored usage count is malformed, treating as 0");
                0
            }),
            None => 0,
        };

        let last_reset_date = kv
            .get(LAST_DATE_KEY)
            .await
            .map_err(EntitlementError::persistence)?
            .unwrap_or_default();

        tracing::debug!(
            tier = %tier,
            used_today = used_today,
            last_reset_date = %last_reset_date,
            "entitlement loaded"
        );

        Ok(Self {
            kv,
            clock,
            state: Mutex::new(Entitlement {
                tier,
                used_today,
                last_reset_date,
            }),
        })
    }

    /// The current subscription tier.
    pub async fn current_tier(&self) -> Tier {
        self.state.lock().await.tier
    }

    /// Redesigns left today, after applying any pending day rollover.
    pub async fn remaining_attempts(&self) -> Result<Remaining, EntitlementError> {
        let mut state = self.state.lock().await;
        self.roll_over(&mut state).await?;
        Ok(state.remaining())
    }

    /// The current entitlement, after applying any pending day rollover.
    pub async fn entitlement(&self) -> Result<Entitlement, EntitlementError> {
        let mut state = self.state.lock().await;
        self.roll_over(&mut state).await?;
        Ok(state.clone())
    }

    /// Snapshot for display and gating.
    pub async fn snapshot(&self) -> Result<EntitlementSnapshot, EntitlementError> {
        let state = self.entitlement().await?;
        Ok(EntitlementSnapshot {
            tier: state.tier,
            used_today: state.used_today,
            remaining: state.remaining(),
            daily_limit: match state.tier {
                Tier::Free => Some(FREE_DAILY_LIMIT),
                Tier::Pro => None,
            },
            last_reset_date: state.last_reset_date,
        })
    }

    /// Non-mutating gate: fails with `QuotaExceeded` when no attempts remain.
    ///
    /// Apart from a pending day rollover, nothing is written.
    pub async fn check_available(&self) -> Result<(), EntitlementError> {
        let mut state = self.state.lock().await;
        self.roll_over(&mut state).await?;
        if state.remaining().is_exhausted() {
            return Err(EntitlementError::QuotaExceeded {
                limit: FREE_DAILY_LIMIT,
            });
        }
        Ok(())
    }

    /// Consume one attempt.
    ///
    /// On a FREE tier with nothing remaining this returns `QuotaExceeded`
    /// and writes nothing. Otherwise `used_today` is incremented and
    /// persisted before the call returns.
    pub async fn try_consume(&self) -> Result<(), EntitlementError> {
        let mut state = self.state.lock().await;
        self.roll_over(&mut state).await?;

        if state.remaining().is_exhausted() {
            tracing::info!(
                tier = %state.tier,
                used_today = state.used_today,
                "quota exhausted, consumption refused"
            );
            return Err(EntitlementError::QuotaExceeded {
                limit: FREE_DAILY_LIMIT,
            });
        }

        let next = state.used_today.saturating_add(1);
        self.kv
            .set(USED_KEY, &next.to_string())
            .await
            .map_err(EntitlementError::persistence)?;
        state.used_today = next;

        tracing::info!(
            tier = %state.tier,
            used_today = next,
            remaining = %state.remaining(),
            "attempt consumed"
        );
        Ok(())
    }

    /// Change the tier. Usage counters are left as they are.
    pub async fn set_tier(&self, tier: Tier) -> Result<(), EntitlementError> {
        let mut state = self.state.lock().await;
        self.kv
            .set(TIER_KEY, &tier.to_string())
            .await
            .map_err(EntitlementError::persistence)?;

        if state.tier != tier {
            tracing::info!(from = %state.tier, to = %tier, "tier changed");
        }
        state.tier = tier;
        Ok(())
    }

    /// Reset `used_today` when the stored date is not today.
    async fn roll_over(&self, state: &mut Entitlement) -> Result<(), EntitlementError> {
        let today = self.clock.today_string();
        if state.last_reset_date == today {
            return Ok(());
        }

        self.kv
            .set_many(&[(USED_KEY, "0"), (LAST_DATE_KEY, today.as_str())])
            .await
            .map_err(EntitlementError::persistence)?;

        tracing::info!(
            previous = %state.last_reset_date,
            today = %today,
            "new day, daily usage reset"
        );
        state.used_today = 0;
        state.last_reset_date = today;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
