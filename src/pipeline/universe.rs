// =============================================================================
// Universe filter — stage-2 quality gate
// =============================================================================
//
// Pure function over the sanitized snapshot set. Rejects on price window,
// minimum volume, and instrument-type blocklist tokens matched against the
// ticker and (when present) the company name. Leveraged-product tokens sit
// behind a separate toggle. The first matching rule records the rejection
// reason.
// =============================================================================

use crate::market_data::Snapshot;
use crate::trace::RejectionCounts;

pub const REASON_PRICE_BELOW: &str = "price_below_min";
pub const REASON_PRICE_ABOVE: &str = "price_above_max";
pub const REASON_VOLUME: &str = "volume_below_min";
pub const REASON_ETF: &str = "etf_token";
pub const REASON_LEVERAGED: &str = "leveraged_token";

/// Instrument types that are never explosive-stock candidates.
const BLOCKLIST_TOKENS: [&str; 5] = ["ETF", "FUND", "INDEX", "TRUST", "REIT"];

/// Leveraged/inverse product markers, behind their own toggle.
const LEVERAGED_TOKENS: [&str; 5] = ["2X", "3X", "BULL", "BEAR", "INVERSE"];

#[derive(Debug, Clone, Copy)]
pub struct UniverseConfig {
    pub price_min: f64,
    pub price_max: f64,
    pub min_volume: u64,
    pub block_leveraged: bool,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            price_min: 0.10,
            price_max: 100.0,
            min_volume: 100_000,
            block_leveraged: true,
        }
    }
}

fn name_tokens(snapshot: &Snapshot) -> impl Iterator<Item = String> + '_ {
    snapshot
        .name
        .as_deref()
        .unwrap_or("")
        .split_whitespace()
        .chain(std::iter::once(snapshot.symbol.as_str()))
        .map(|t| t.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_uppercase())
}

fn rejection_reason(snapshot: &Snapshot, cfg: &UniverseConfig) -> Option<&'static str> {
    if snapshot.price < cfg.price_min {
        return Some(REASON_PRICE_BELOW);
    }
    if snapshot.price > cfg.price_max {
        return Some(REASON_PRICE_ABOVE);
    }
    if snapshot.volume < cfg.min_volume {
        return Some(REASON_VOLUME);
    }
    for token in name_tokens(snapshot) {
        if BLOCKLIST_TOKENS.contains(&token.as_str()) {
            return Some(REASON_ETF);
        }
        if cfg.block_leveraged && LEVERAGED_TOKENS.contains(&token.as_str()) {
            return Some(REASON_LEVERAGED);
        }
    }
    None
}

/// Apply the stage-2 gate, counting each rejection under its reason.
pub fn filter_universe(
    snapshots: Vec<Snapshot>,
    cfg: &UniverseConfig,
    rejections: &mut RejectionCounts,
) -> Vec<Snapshot> {
    snapshots
        .into_iter()
        .filter(|s| match rejection_reason(s, cfg) {
            Some(reason) => {
                rejections.inc(reason);
                false
            }
            None => true,
        })
        .collect()
}
