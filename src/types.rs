// =============================================================================
// Shared types used across the Nova discovery engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trading session, derived from the exchange clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Premarket,
    Regular,
    Afterhours,
    Closed,
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Premarket => write!(f, "premarket"),
            Self::Regular => write!(f, "regular"),
            Self::Afterhours => write!(f, "afterhours"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Final classification of a scored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    TradeReady,
    Watchlist,
    Rejected,
}

impl std::fmt::Display for ActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TradeReady => write!(f, "trade_ready"),
            Self::Watchlist => write!(f, "watchlist"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Coarse bucketing of tradeable share count.
///
/// Small <= 75M shares, mid 75-150M, large >= 150M. Unknown means no float
/// data was available from any attributed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatClass {
    Small,
    Mid,
    Large,
    Unknown,
}

impl FloatClass {
    /// Classify a float given in millions of shares.
    pub fn from_millions(float_m: f64, small_max_m: f64, large_min_m: f64) -> Self {
        if float_m <= 0.0 {
            Self::Unknown
        } else if float_m <= small_max_m {
            Self::Small
        } else if float_m >= large_min_m {
            Self::Large
        } else {
            Self::Mid
        }
    }
}

impl std::fmt::Display for FloatClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Mid => write!(f, "mid"),
            Self::Large => write!(f, "large"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Coarse operational state reported by the read-side API.
///
/// DEGRADED is a data statement, not an HTTP error: the API still answers 200
/// with an empty candidate list and a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemState {
    #[serde(rename = "HEALTHY")]
    Healthy,
    #[serde(rename = "DEGRADED")]
    Degraded,
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// Normalise a raw ticker into the engine's canonical symbol form.
///
/// Symbols are 1-6 uppercase alphanumeric characters; anything else is
/// rejected at the ingest boundary.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let s = raw.trim().to_uppercase();
    if s.is_empty() || s.len() > 6 {
        return None;
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(s)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_normalisation_accepts_plain_tickers() {
        assert_eq!(normalize_symbol("vigl"), Some("VIGL".to_string()));
        assert_eq!(normalize_symbol(" XLK "), Some("XLK".to_string()));
        assert_eq!(normalize_symbol("A"), Some("A".to_string()));
    }

    #[test]
    fn symbol_normalisation_rejects_garbage() {
        assert_eq!(normalize_symbol(""), None);
        assert_eq!(normalize_symbol("TOOLONG1"), None);
        assert_eq!(normalize_symbol("BRK.B"), None);
        assert_eq!(normalize_symbol("AB-CD"), None);
    }

    #[test]
    fn float_classification_boundaries() {
        assert_eq!(FloatClass::from_millions(40.0, 75.0, 150.0), FloatClass::Small);
        assert_eq!(FloatClass::from_millions(75.0, 75.0, 150.0), FloatClass::Small);
        assert_eq!(FloatClass::from_millions(100.0, 75.0, 150.0), FloatClass::Mid);
        assert_eq!(FloatClass::from_millions(150.0, 75.0, 150.0), FloatClass::Large);
        assert_eq!(FloatClass::from_millions(0.0, 75.0, 150.0), FloatClass::Unknown);
    }

    #[test]
    fn action_tag_serialises_snake_case() {
        let json = serde_json::to_string(&ActionTag::TradeReady).unwrap();
        assert_eq!(json, "\"trade_ready\"");
    }

    #[test]
    fn system_state_serialises_uppercase() {
        let json = serde_json::to_string(&SystemState::Degraded).unwrap();
        assert_eq!(json, "\"DEGRADED\"");
    }
}
