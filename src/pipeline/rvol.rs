// =============================================================================
// RVOL evaluator — stage-5 relative-volume filter
// =============================================================================
//
// Looks every pre-ranked survivor up in the warmed volume-average map and
// computes rvol = volume / avg_20d. A cache miss drops the symbol (no
// fallback average, ever), an rvol above the corruption guard drops it, and
// anything under the session-adjusted minimum drops it. Each drop has its own
// reason so the debug histogram separates "cache coverage" problems from
// "quiet tape" outcomes.
// =============================================================================

use std::collections::HashMap;

use crate::market_data::Snapshot;
use crate::trace::RejectionCounts;
use crate::volume_cache::VolumeAverage;

pub const REASON_CACHE_MISS: &str = "cache_miss";
pub const REASON_RVOL_BELOW: &str = "rvol_below_min";
pub const REASON_RVOL_CORRUPT: &str = "rvol_corrupt";

/// An rvol above this is treated as cache corruption, not a signal.
pub const RVOL_CORRUPTION_MAX: f64 = 1000.0;

/// A pre-ranked snapshot with its cache row and computed rvol.
#[derive(Debug, Clone)]
pub struct RvolSurvivor {
    pub snapshot: Snapshot,
    pub average: VolumeAverage,
    pub rvol: f64,
}

/// Apply the stage-5 filter.
pub fn evaluate_rvol(
    ranked: Vec<Snapshot>,
    averages: &HashMap<String, VolumeAverage>,
    min_rvol: f64,
    rejections: &mut RejectionCounts,
) -> Vec<RvolSurvivor> {
    let mut out = Vec::with_capacity(ranked.len());

    for snapshot in ranked {
        let Some(average) = averages.get(&snapshot.symbol) else {
            rejections.inc(REASON_CACHE_MISS);
            continue;
        };

        let rvol = snapshot.volume as f64 / average.avg_20d as f64;

        if rvol > RVOL_CORRUPTION_MAX {
            rejections.inc(REASON_RVOL_CORRUPT);
            continue;
        }
        if rvol < min_rvol {
            rejections.inc(REASON_RVOL_BELOW);
            continue;
        }

        out.push(RvolSurvivor {
            average: average.clone(),
            rvol,
            snapshot,
        });
    }

    out
}
