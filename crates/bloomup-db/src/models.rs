use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Subscription tier governing the daily redesign quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "FREE",
            Self::Pro => "PRO",
        };
        f.write_str(s)
    }
}

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(Self::Free),
            "PRO" => Ok(Self::Pro),
            _ => Err(TierParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Tier`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid tier: {0:?}")]
pub struct TierParseError(pub String);

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A single key/value row from the `settings` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Setting {
    pub user_id: String,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_display_roundtrip() {
        for tier in [Tier::Free, Tier::Pro] {
            let parsed: Tier = tier.to_string().parse().unwrap();
            assert_eq!(parsed, tier);
        }
    }

    #[test]
    fn tier_parse_is_case_insensitive() {
        assert_eq!("pro".parse::<Tier>().unwrap(), Tier::Pro);
        assert_eq!(" Free ".parse::<Tier>().unwrap(), Tier::Free);
    }

    #[test]
    fn tier_parse_rejects_unknown() {
        let err = "ENTERPRISE".parse::<Tier>().unwrap_err();
        assert_eq!(err.to_string(), "invalid tier: \"ENTERPRISE\"");
    }

    #[test]
    fn tier_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Tier::Pro).unwrap(), "\"PRO\"");
        assert_eq!(Tier::default(), Tier::Free);
    }
}
