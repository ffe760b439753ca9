// =============================================================================
// Trace recorder — per-scan stage telemetry and rejection histograms
// =============================================================================
//
// Every stage reports how many symbols came in, how many left, how long it
// took, and a histogram of rejection reasons. Scans are kept in a bounded
// ring (oldest evicted) and surfaced through the debug endpoint. No raw
// provider payloads and no per-symbol detail beyond reason counts are ever
// stored here.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Default number of scans retained.
pub const DEFAULT_TRACE_CAPACITY: usize = 16;

/// Cap on distinct rejection reasons per stage; overflow folds into "other".
const MAX_REASON_CARDINALITY: usize = 64;

/// Bounded-cardinality rejection histogram.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RejectionCounts(HashMap<String, u64>);

impl RejectionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&mut self, reason: &str) {
        self.add(reason, 1);
    }

    pub fn add(&mut self, reason: &str, n: u64) {
        if let Some(count) = self.0.get_mut(reason) {
            *count += n;
        } else if self.0.len() < MAX_REASON_CARDINALITY {
            self.0.insert(reason.to_string(), n);
        } else {
            *self.0.entry("other".to_string()).or_insert(0) += n;
        }
    }

    pub fn get(&self, reason: &str) -> u64 {
        self.0.get(reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, u64> {
        self.0
    }
}

/// One stage's telemetry within a scan.
#[derive(Debug, Clone, Serialize)]
pub struct StageTrace {
    pub stage: &'static str,
    pub duration_ms: u64,
    pub count_in: usize,
    pub count_out: usize,
    pub rejections: RejectionCounts,
}

/// Terminal outcome of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Published,
    ScanAborted,
    ProviderFailed,
    PublishFailed,
}

/// Full trace of one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanTrace {
    pub scan_id: String,
    pub strategy: String,
    pub session: String,
    pub started_at: DateTime<Utc>,
    pub outcome: ScanOutcome,
    pub stages: Vec<StageTrace>,
    pub total_duration_ms: u64,
}

impl ScanTrace {
    /// Merge every stage's histogram into one scan-level view.
    pub fn rejection_histogram(&self) -> HashMap<String, u64> {
        let mut out: HashMap<String, u64> = HashMap::new();
        for stage in &self.stages {
            for (reason, count) in &stage.rejections.0 {
                *out.entry(reason.clone()).or_insert(0) += count;
            }
        }
        out
    }
}

/// Ring of recent scan traces.
pub struct TraceRecorder {
    ring: RwLock<VecDeque<ScanTrace>>,
    capacity: usize,
}

impl TraceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, trace: ScanTrace) {
        let mut ring = self.ring.write();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(trace);
    }

    /// Most recent trace for a strategy.
    pub fn latest_for(&self, strategy: &str) -> Option<ScanTrace> {
        self.ring
            .read()
            .iter()
            .rev()
            .find(|t| t.strategy == strategy)
            .cloned()
    }

    pub fn all(&self) -> Vec<ScanTrace> {
        self.ring.read().iter().cloned().collect()
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn trace(scan_id: &str, strategy: &str) -> ScanTrace {
        ScanTrace {
            scan_id: scan_id.to_string(),
            strategy: strategy.to_string(),
            session: "regular".to_string(),
            started_at: Utc::now(),
            outcome: ScanOutcome::Published,
            stages: Vec::new(),
            total_duration_ms: 5,
        }
    }

    #[test]
    fn ring_evicts_oldest() {
        let recorder = TraceRecorder::new(2);
        recorder.record(trace("a", "hybrid_v1"));
        recorder.record(trace("b", "hybrid_v1"));
        recorder.record(trace("c", "hybrid_v1"));

        let all = recorder.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].scan_id, "b");
        assert_eq!(all[1].scan_id, "c");
    }

    #[test]
    fn latest_for_filters_by_strategy() {
        let recorder = TraceRecorder::new(8);
        recorder.record(trace("a", "hybrid_v1"));
        recorder.record(trace("b", "legacy_v0"));
        recorder.record(trace("c", "hybrid_v1"));

        assert_eq!(recorder.latest_for("hybrid_v1").unwrap().scan_id, "c");
        assert_eq!(recorder.latest_for("legacy_v0").unwrap().scan_id, "b");
        assert!(recorder.latest_for("nope").is_none());
    }

    #[test]
    fn rejection_counts_accumulate() {
        let mut counts = RejectionCounts::new();
        counts.inc("cache_miss");
        counts.inc("cache_miss");
        counts.add("rvol_below_min", 3);
        assert_eq!(counts.get("cache_miss"), 2);
        assert_eq!(counts.get("rvol_below_min"), 3);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn reason_cardinality_is_bounded() {
        let mut counts = RejectionCounts::new();
        for i in 0..200 {
            counts.inc(&format!("reason_{i}"));
        }
        assert!(counts.into_inner().len() <= MAX_REASON_CARDINALITY + 1);
    }

    #[test]
    fn scan_histogram_merges_stages() {
        let mut universe = RejectionCounts::new();
        universe.inc("price_above_max");
        let mut rvol = RejectionCounts::new();
        rvol.inc("cache_miss");
        rvol.inc("cache_miss");

        let mut t = trace("a", "hybrid_v1");
        t.stages = vec![
            StageTrace {
                stage: "universe_filter",
                duration_ms: 1,
                count_in: 10,
                count_out: 9,
                rejections: universe,
            },
            StageTrace {
                stage: "rvol",
                duration_ms: 1,
                count_in: 9,
                count_out: 7,
                rejections: rvol,
            },
        ];

        let merged = t.rejection_histogram();
        assert_eq!(merged["price_above_max"], 1);
        assert_eq!(merged["cache_miss"], 2);
    }
}
