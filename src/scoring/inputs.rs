// =============================================================================
// Factor inputs — missing is unknown, never a number
// =============================================================================
//
// Every raw input feeding a subscore is an `Input<T>`: either Known with a
// value and a source attribution, or Missing with a reason. Subscores compute
// from Known values only and contribute 0 for Missing ones. There is no
// default-value path anywhere in scoring.
//
// The banned-defaults list exists because placeholder constants have
// historically been smuggled into feeds under fallback sources. A Known value
// from a `sector_fallback` or `default` source that matches one of these
// constants is treated as corruption and suppresses the entire publish at
// read time (see the API's fabrication guard).
// =============================================================================

use serde::{Deserialize, Serialize};

/// Values historically used as placeholders by fallback feeds.
pub const BANNED_DEFAULTS: [f64; 7] = [0.25, 0.30, 0.50, 1.00, 100.0, 15.0, 0.15];

const BANNED_EPSILON: f64 = 1e-9;

/// Where a Known value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Straight from the market-data provider.
    Provider,
    /// Computed from provider or cache data (e.g. intraday range -> ATR%).
    Derived,
    /// Supplied by an attributed enrichment feed.
    Enrichment,
    /// Sector-level stand-in. Legal to carry, but banned-value checked.
    SectorFallback,
    /// Hardcoded default. Legal to carry, but banned-value checked.
    Default,
}

impl Source {
    /// Sources whose values are suspect when they match a banned constant.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::SectorFallback | Self::Default)
    }
}

/// A subscore input: a known, attributed value or an explicit absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Input<T> {
    Known { value: T, source: Source },
    Missing { reason: String },
}

impl<T> Input<T> {
    pub fn known(value: T, source: Source) -> Self {
        Self::Known { value, source }
    }

    pub fn missing(reason: impl Into<String>) -> Self {
        Self::Missing {
            reason: reason.into(),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Known { value, .. } => Some(value),
            Self::Missing { .. } => None,
        }
    }
}

impl Input<f64> {
    pub fn get(&self) -> Option<f64> {
        self.value().copied()
    }

    /// True when this input is a fallback-sourced banned constant.
    pub fn is_banned_fabrication(&self) -> bool {
        match self {
            Self::Known { value, source } if source.is_fallback() => BANNED_DEFAULTS
                .iter()
                .any(|b| (value - b).abs() <= BANNED_EPSILON),
            _ => false,
        }
    }
}

impl Input<bool> {
    pub fn get_bool(&self) -> Option<bool> {
        self.value().copied()
    }
}

/// EMA-cross state feeding the technical subscore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaCross {
    Bull,
    Flat,
    Bear,
}

/// All raw inputs carried by a candidate. Serialized into the artifact so the
/// read side can audit sources and run the fabrication guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSet {
    // Derived on the hot path from snapshot + volume cache.
    pub relvol_30: Input<f64>,
    pub atr_pct: Input<f64>,
    pub vwap_reclaimed: Input<bool>,

    // Enrichment-fed.
    pub uptrend_days: Input<f64>,
    pub float_shares_m: Input<f64>,
    pub short_interest: Input<f64>,
    pub borrow_fee: Input<f64>,
    pub utilization: Input<f64>,
    pub news_score: Input<f64>,
    pub social_rank: Input<f64>,
    pub call_put_ratio: Input<f64>,
    pub iv_percentile: Input<f64>,
    pub ema_cross: Input<EmaCross>,
    pub rsi: Input<f64>,
}

impl FactorSet {
    /// Scan every numeric input for fallback-sourced banned constants.
    pub fn has_banned_fabrication(&self) -> bool {
        self.numeric_inputs()
            .iter()
            .any(|i| i.is_banned_fabrication())
    }

    fn numeric_inputs(&self) -> [&Input<f64>; 12] {
        [
            &self.relvol_30,
            &self.atr_pct,
            &self.uptrend_days,
            &self.float_shares_m,
            &self.short_interest,
            &self.borrow_fee,
            &self.utilization,
            &self.news_score,
            &self.social_rank,
            &self.call_put_ratio,
            &self.iv_percentile,
            &self.rsi,
        ]
    }
}

/// Enrichment feed payload for one symbol: everything the hot path cannot
/// derive from the snapshot and the volume cache.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub uptrend_days: Input<f64>,
    pub float_shares_m: Input<f64>,
    pub short_interest: Input<f64>,
    pub borrow_fee: Input<f64>,
    pub utilization: Input<f64>,
    pub news_score: Input<f64>,
    pub social_rank: Input<f64>,
    pub call_put_ratio: Input<f64>,
    pub iv_percentile: Input<f64>,
    pub ema_cross: Input<EmaCross>,
    pub rsi: Input<f64>,
}

impl Default for Enrichment {
    fn default() -> Self {
        let absent = || Input::missing("no_enrichment_source");
        Self {
            uptrend_days: absent(),
            float_shares_m: absent(),
            short_interest: absent(),
            borrow_fee: absent(),
            utilization: absent(),
            news_score: absent(),
            social_rank: absent(),
            call_put_ratio: absent(),
            iv_percentile: absent(),
            ema_cross: Input::missing("no_enrichment_source"),
            rsi: absent(),
        }
    }
}

/// Source of enrichment inputs, injected into the orchestrator. The engine
/// never fabricates what a source does not supply.
pub trait EnrichmentSource: Send + Sync {
    fn enrich(&self, symbol: &str) -> Enrichment;
}

/// Production default when no enrichment feed is wired: everything Missing.
pub struct NoEnrichment;

impl EnrichmentSource for NoEnrichment {
    fn enrich(&self, _symbol: &str) -> Enrichment {
        Enrichment::default()
    }
}

/// Canned per-symbol enrichment for tests.
#[cfg(test)]
pub struct StaticEnrichment(pub std::collections::HashMap<String, Enrichment>);

#[cfg(test)]
impl EnrichmentSource for StaticEnrichment {
    fn enrich(&self, symbol: &str) -> Enrichment {
        self.0.get(symbol).cloned().unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banned_value_from_fallback_source_is_flagged() {
        let i = Input::known(0.15, Source::SectorFallback);
        assert!(i.is_banned_fabrication());
        let i = Input::known(0.15, Source::Default);
        assert!(i.is_banned_fabrication());
    }

    #[test]
    fn banned_value_from_attributed_source_is_fine() {
        // 15% short interest from a real feed is a legitimate observation.
        let i = Input::known(0.15, Source::Enrichment);
        assert!(!i.is_banned_fabrication());
        let i = Input::known(0.15, Source::Provider);
        assert!(!i.is_banned_fabrication());
    }

    #[test]
    fn non_banned_fallback_value_is_fine() {
        let i = Input::known(0.17, Source::SectorFallback);
        assert!(!i.is_banned_fabrication());
    }

    #[test]
    fn missing_is_never_fabrication() {
        let i: Input<f64> = Input::missing("no_feed");
        assert!(!i.is_banned_fabrication());
        assert_eq!(i.get(), None);
    }

    #[test]
    fn input_serialisation_carries_state_and_source() {
        let known = serde_json::to_value(Input::known(2.5, Source::Derived)).unwrap();
        assert_eq!(known["state"], "known");
        assert_eq!(known["source"], "derived");

        let missing = serde_json::to_value(Input::<f64>::missing("cache_miss")).unwrap();
        assert_eq!(missing["state"], "missing");
        assert_eq!(missing["reason"], "cache_miss");
    }

    #[test]
    fn factor_set_roundtrips_through_json() {
        let factors = FactorSet {
            relvol_30: Input::known(3.1, Source::Derived),
            atr_pct: Input::known(0.08, Source::Derived),
            vwap_reclaimed: Input::known(true, Source::Derived),
            uptrend_days: Input::missing("no_enrichment_source"),
            float_shares_m: Input::known(42.0, Source::Enrichment),
            short_interest: Input::known(0.35, Source::Enrichment),
            borrow_fee: Input::missing("no_enrichment_source"),
            utilization: Input::missing("no_enrichment_source"),
            news_score: Input::known(0.8, Source::Enrichment),
            social_rank: Input::missing("no_enrichment_source"),
            call_put_ratio: Input::missing("no_enrichment_source"),
            iv_percentile: Input::missing("no_enrichment_source"),
            ema_cross: Input::known(EmaCross::Bull, Source::Enrichment),
            rsi: Input::known(68.0, Source::Enrichment),
        };
        let json = serde_json::to_string(&factors).unwrap();
        let back: FactorSet = serde_json::from_str(&json).unwrap();
        assert_eq!(factors, back);
    }
}
