// =============================================================================
// Momentum pre-ranker — stage-3 work cap
// =============================================================================
//
// Scores every universe survivor with `m = 2*|change_pct| + ln(max(volume,1))`
// and keeps the top K, so downstream cache reads and scoring touch a bounded
// set. Ties break by volume descending then symbol ascending, which keeps the
// cut deterministic across runs on frozen inputs.
//
// When the market is closed every change_pct is 0 and the ranking degenerates
// to volume; that is acceptable because the RVOL stage re-sorts survivors on
// relative, not absolute, volume.
// =============================================================================

use crate::market_data::Snapshot;

/// Momentum rank score for one snapshot.
pub fn momentum_score(snapshot: &Snapshot) -> f64 {
    2.0 * snapshot.change_pct.abs() + (snapshot.volume.max(1) as f64).ln()
}

/// Keep the top `k` survivors by momentum score.
pub fn rank_by_momentum(mut snapshots: Vec<Snapshot>, k: usize) -> Vec<Snapshot> {
    snapshots.sort_by(|a, b| {
        momentum_score(b)
            .partial_cmp(&momentum_score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.volume.cmp(&a.volume))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    snapshots.truncate(k);
    snapshots
}
