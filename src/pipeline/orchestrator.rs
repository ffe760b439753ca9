// =============================================================================
// Discovery orchestrator — drives the seven scan stages
// =============================================================================
//
// One scan:
//   1. bulk snapshot fetch (overlapped with cache warming)
//   2. universe filter
//   3. momentum pre-rank (top K)
//   4. volume-average batch read (served from the warmed map)
//   5. rvol evaluation
//   6. scoring (sharded across threads above the survivor threshold)
//   7. publish
//
// The orchestrator is the only writer that publishes artifacts, and at most
// one run per strategy is in flight (lease-based single-writer lock). A soft
// wall-clock budget is advisory; breaching the hard budget abandons the scan
// between stages without publishing, leaving the previous artifact
// authoritative. Every stage reports timing and rejections to the trace
// recorder.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::calibration::{CalibrationStore, ResolvedProfile};
use crate::clock::{session_at, Clock};
use crate::config::Settings;
use crate::events::{EventSink, ScanEvent};
use crate::market_data::provider::{MarketData, ProviderError};
use crate::pipeline::momentum::rank_by_momentum;
use crate::pipeline::rvol::{evaluate_rvol, RvolSurvivor};
use crate::pipeline::universe::{filter_universe, UniverseConfig};
use crate::publish::{CandidatePublisher, PublishError, ScanArtifact, ScanStats};
use crate::scoring::{Candidate, EnrichmentSource, ScoreOutcome, ScoringEngine};
use crate::trace::{RejectionCounts, ScanOutcome, ScanTrace, StageTrace, TraceRecorder};
use crate::types::{ActionTag, Session};
use crate::volume_cache::{CacheError, VolumeCache};

pub const REASON_SOFT_PASS_CAP: &str = "soft_pass_cap_exceeded";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("a scan for this strategy is already in flight")]
    AlreadyRunning,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("calibration error: {0}")]
    Calibration(#[from] crate::calibration::CalibrationError),
    #[error("scan exceeded its hard wall-clock budget at stage {stage}")]
    BudgetExceeded { stage: &'static str },
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("internal scan failure: {0}")]
    Internal(String),
}

/// Lease-based single-writer lock: one in-flight scan per strategy. The lease
/// TTL covers a crashed holder (a panicked task never calls release).
pub struct ScanLock {
    leases: Mutex<HashMap<String, Instant>>,
    lease_ttl: Duration,
}

impl ScanLock {
    pub fn new(lease_ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            lease_ttl,
        }
    }

    fn try_acquire(&self, strategy: &str) -> bool {
        let mut leases = self.leases.lock();
        match leases.get(strategy) {
            Some(taken_at) if taken_at.elapsed() < self.lease_ttl => false,
            _ => {
                leases.insert(strategy.to_string(), Instant::now());
                true
            }
        }
    }

    fn release(&self, strategy: &str) {
        self.leases.lock().remove(strategy);
    }
}

/// Outcome summary returned to the scan loop.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub strategy: String,
    pub session: Session,
    pub candidates: usize,
    pub trade_ready: usize,
    pub duration_ms: u64,
}

/// Side-by-side result of one strategy in a validation run.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyValidation {
    pub strategy: String,
    pub preset: String,
    pub weights_hash: String,
    pub rvol_survivors: usize,
    pub candidates: usize,
    pub trade_ready: usize,
    pub top: Vec<ValidationRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationRow {
    pub symbol: String,
    pub score: f64,
    pub action_tag: ActionTag,
}

pub struct DiscoveryOrchestrator {
    provider: Arc<dyn MarketData>,
    cache: Arc<VolumeCache>,
    calibration: Arc<CalibrationStore>,
    enrichment: Arc<dyn EnrichmentSource>,
    publisher: Arc<CandidatePublisher>,
    trace: Arc<TraceRecorder>,
    events: Arc<EventSink>,
    clock: Arc<dyn Clock>,
    lock: ScanLock,

    universe_cfg: UniverseConfig,
    momentum_top_k: usize,
    scoring_shard_threshold: usize,
    max_candidates: usize,
    soft_budget: Duration,
    hard_budget: Duration,
    et_utc_offset_hours: i64,
}

struct StageClock {
    hard_deadline: Instant,
}

impl StageClock {
    fn check(&self, stage: &'static str) -> Result<(), ScanError> {
        if Instant::now() >= self.hard_deadline {
            return Err(ScanError::BudgetExceeded { stage });
        }
        Ok(())
    }
}

impl DiscoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        provider: Arc<dyn MarketData>,
        cache: Arc<VolumeCache>,
        calibration: Arc<CalibrationStore>,
        enrichment: Arc<dyn EnrichmentSource>,
        publisher: Arc<CandidatePublisher>,
        trace: Arc<TraceRecorder>,
        events: Arc<EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            cache,
            calibration,
            enrichment,
            publisher,
            trace,
            events,
            clock,
            lock: ScanLock::new(Duration::from_secs(settings.hard_budget_seconds() + 5)),
            universe_cfg: UniverseConfig::default(),
            momentum_top_k: settings.momentum_top_k,
            scoring_shard_threshold: settings.scoring_shard_threshold,
            max_candidates: settings.max_candidates,
            soft_budget: Duration::from_secs(settings.scan_budget_seconds),
            hard_budget: Duration::from_secs(settings.hard_budget_seconds()),
            et_utc_offset_hours: settings.et_utc_offset_hours,
        }
    }

    /// Run one full scan for `strategy` and publish the artifact.
    pub async fn run_scan(&self, strategy: &str) -> Result<ScanReport, ScanError> {
        if !self.lock.try_acquire(strategy) {
            return Err(ScanError::AlreadyRunning);
        }
        let result = self.run_scan_locked(strategy).await;
        self.lock.release(strategy);
        result
    }

    async fn run_scan_locked(&self, strategy: &str) -> Result<ScanReport, ScanError> {
        let scan_id = uuid::Uuid::new_v4().to_string();
        let started_at = self.clock.now();
        let scan_start = Instant::now();
        let stage_clock = StageClock {
            hard_deadline: scan_start + self.hard_budget,
        };

        // Calibration binds once, at scan start; mid-scan patches apply to
        // the next run.
        let resolved = self.calibration.resolve(strategy)?;
        let session = session_at(started_at, self.et_utc_offset_hours);
        let thresholds = resolved.thresholds_for(session);

        info!(
            scan_id = %scan_id,
            strategy,
            effective_strategy = %resolved.profile.strategy,
            session = %session,
            forced = resolved.forced,
            "scan starting"
        );

        let mut stages: Vec<StageTrace> = Vec::with_capacity(7);
        let record_abort = |stages: Vec<StageTrace>, outcome: ScanOutcome| {
            self.trace.record(ScanTrace {
                scan_id: scan_id.clone(),
                strategy: strategy.to_string(),
                session: session.to_string(),
                started_at,
                outcome,
                stages,
                total_duration_ms: scan_start.elapsed().as_millis() as u64,
            });
        };

        // ── Stage 1: bulk snapshot, overlapped with cache warming ───────
        let warm_cache = self.cache.clone();
        let warm_now = started_at;
        let stage1_start = Instant::now();
        let (snapshot_result, warm_result) = tokio::join!(self.provider.bulk_snapshot(), async move {
            tokio::task::spawn_blocking(move || warm_cache.warm(warm_now)).await
        });

        let bulk = match snapshot_result {
            Ok(bulk) => bulk,
            Err(e) => {
                warn!(scan_id = %scan_id, error = %e, "bulk snapshot failed, scan aborted");
                record_abort(stages, ScanOutcome::ProviderFailed);
                return Err(e.into());
            }
        };
        let averages = match warm_result {
            Ok(Ok(map)) => map,
            Ok(Err(e)) => {
                record_abort(stages, ScanOutcome::ScanAborted);
                return Err(e.into());
            }
            Err(join_err) => {
                warn!(error = %join_err, "cache warm task failed");
                record_abort(stages, ScanOutcome::ScanAborted);
                return Err(ScanError::Internal(format!("cache warm task failed: {join_err}")));
            }
        };

        let universe = bulk.snapshots;
        let dropped_rows = bulk.dropped_rows;
        let universe_len = universe.len();
        stages.push(StageTrace {
            stage: "bulk_snapshot",
            duration_ms: stage1_start.elapsed().as_millis() as u64,
            count_in: universe_len + dropped_rows as usize,
            count_out: universe_len,
            rejections: {
                let mut r = RejectionCounts::new();
                if dropped_rows > 0 {
                    r.add("invalid_row", dropped_rows);
                }
                r
            },
        });
        if let Err(e) = stage_clock.check("universe_filter") {
            record_abort(stages, ScanOutcome::ScanAborted);
            return Err(e);
        }

        // ── Stage 2: universe filter ────────────────────────────────────
        let stage_start = Instant::now();
        let mut universe_rejections = RejectionCounts::new();
        let filtered = filter_universe(universe, &self.universe_cfg, &mut universe_rejections);
        stages.push(StageTrace {
            stage: "universe_filter",
            duration_ms: stage_start.elapsed().as_millis() as u64,
            count_in: universe_len,
            count_out: filtered.len(),
            rejections: universe_rejections,
        });
        if let Err(e) = stage_clock.check("momentum_rank") {
            record_abort(stages, ScanOutcome::ScanAborted);
            return Err(e);
        }

        // ── Stage 3: momentum pre-rank ──────────────────────────────────
        let stage_start = Instant::now();
        let filtered_len = filtered.len();
        let ranked = rank_by_momentum(filtered, self.momentum_top_k);
        stages.push(StageTrace {
            stage: "momentum_rank",
            duration_ms: stage_start.elapsed().as_millis() as u64,
            count_in: filtered_len,
            count_out: ranked.len(),
            rejections: {
                let mut r = RejectionCounts::new();
                let cut = filtered_len.saturating_sub(ranked.len());
                if cut > 0 {
                    r.add("below_momentum_topk", cut as u64);
                }
                r
            },
        });
        if let Err(e) = stage_clock.check("cache_read") {
            record_abort(stages, ScanOutcome::ScanAborted);
            return Err(e);
        }

        // ── Stage 4: batch cache read (served from the warmed map) ──────
        let stage_start = Instant::now();
        let ranked_len = ranked.len();
        let cache_hits = ranked
            .iter()
            .filter(|s| averages.contains_key(&s.symbol))
            .count();
        stages.push(StageTrace {
            stage: "cache_read",
            duration_ms: stage_start.elapsed().as_millis() as u64,
            count_in: ranked_len,
            count_out: cache_hits,
            rejections: RejectionCounts::new(),
        });

        // ── Stage 5: rvol evaluation ────────────────────────────────────
        let stage_start = Instant::now();
        let mut rvol_rejections = RejectionCounts::new();
        let survivors = evaluate_rvol(ranked, &averages, thresholds.min_rvol, &mut rvol_rejections);
        stages.push(StageTrace {
            stage: "rvol",
            duration_ms: stage_start.elapsed().as_millis() as u64,
            count_in: ranked_len,
            count_out: survivors.len(),
            rejections: rvol_rejections,
        });
        if let Err(e) = stage_clock.check("scoring") {
            record_abort(stages, ScanOutcome::ScanAborted);
            return Err(e);
        }

        // ── Stage 6: scoring ────────────────────────────────────────────
        let stage_start = Instant::now();
        let survivor_count = survivors.len();
        let (mut candidates, scoring_rejections, soft_pass_admitted) =
            self.score_survivors(survivors, &resolved, session, &scan_id);
        stages.push(StageTrace {
            stage: "scoring",
            duration_ms: stage_start.elapsed().as_millis() as u64,
            count_in: survivor_count,
            count_out: candidates.len(),
            rejections: scoring_rejections,
        });
        if let Err(e) = stage_clock.check("publish") {
            record_abort(stages, ScanOutcome::ScanAborted);
            return Err(e);
        }

        // ── Stage 7: publish ────────────────────────────────────────────
        let stage_start = Instant::now();
        let scored = candidates.len();
        candidates.truncate(self.max_candidates);
        let trade_ready = candidates
            .iter()
            .filter(|c| c.action_tag == ActionTag::TradeReady)
            .count();
        let published = candidates.len();

        let artifact = ScanArtifact {
            scan_id: scan_id.clone(),
            generated_at: self.clock.now(),
            strategy: strategy.to_string(),
            preset: resolved.profile.active_preset.clone(),
            weights_hash: resolved.weights_hash.clone(),
            candidates,
            stats: ScanStats {
                universe: universe_len + dropped_rows as usize,
                dropped_rows,
                universe_survivors: filtered_len,
                momentum_survivors: ranked_len,
                cache_hits,
                rvol_survivors: survivor_count,
                scored,
                soft_pass_admitted,
                published,
                duration_ms: scan_start.elapsed().as_millis() as u64,
            },
            trace_ref: scan_id.clone(),
        };

        if let Err(e) = self.publisher.publish(&artifact) {
            warn!(scan_id = %scan_id, error = %e, "publish failed, previous artifact retained");
            record_abort(stages, ScanOutcome::PublishFailed);
            return Err(e.into());
        }
        stages.push(StageTrace {
            stage: "publish",
            duration_ms: stage_start.elapsed().as_millis() as u64,
            count_in: published,
            count_out: published,
            rejections: RejectionCounts::new(),
        });

        let total_ms = scan_start.elapsed().as_millis() as u64;
        if scan_start.elapsed() > self.soft_budget {
            warn!(scan_id = %scan_id, total_ms, "scan exceeded its soft budget");
        }

        self.trace.record(ScanTrace {
            scan_id: scan_id.clone(),
            strategy: strategy.to_string(),
            session: session.to_string(),
            started_at,
            outcome: ScanOutcome::Published,
            stages,
            total_duration_ms: total_ms,
        });

        self.events.emit(ScanEvent {
            event: "scan_completed",
            scan_id: scan_id.clone(),
            strategy: strategy.to_string(),
            generated_at: artifact.generated_at,
            candidates: published,
            trade_ready,
            weights_hash: artifact.weights_hash.clone(),
        });

        info!(scan_id = %scan_id, candidates = published, trade_ready, total_ms, "scan published");
        Ok(ScanReport {
            scan_id,
            strategy: strategy.to_string(),
            session,
            candidates: published,
            trade_ready,
            duration_ms: total_ms,
        })
    }

    /// Score every rvol survivor, order deterministically, then apply the
    /// soft-pass cap in that order.
    fn score_survivors(
        &self,
        survivors: Vec<RvolSurvivor>,
        resolved: &ResolvedProfile,
        session: Session,
        scan_id: &str,
    ) -> (Vec<Candidate>, RejectionCounts, usize) {
        let score_one = |s: &RvolSurvivor| {
            let enrichment = self.enrichment.enrich(&s.snapshot.symbol);
            ScoringEngine::evaluate(
                &s.snapshot,
                s.rvol,
                &s.average,
                enrichment,
                resolved,
                session,
                scan_id,
            )
        };

        let outcomes: Vec<ScoreOutcome> = if survivors.len() > self.scoring_shard_threshold {
            survivors.par_iter().map(score_one).collect()
        } else {
            survivors.iter().map(score_one).collect()
        };

        let mut rejections = RejectionCounts::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        for outcome in outcomes {
            match outcome {
                ScoreOutcome::Accepted(c) => candidates.push(*c),
                ScoreOutcome::Rejected { reason, .. } => rejections.inc(reason),
            }
        }

        // Deterministic artifact order: score desc, symbol asc.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        // Enforce the per-scan soft-pass cap in sorted order, so shard
        // scheduling can never change which near-miss wins a slot.
        let cap = resolved.thresholds_for(session).max_soft_pass as usize;
        let mut soft_seen = 0usize;
        candidates.retain(|c| {
            if !c.soft_pass {
                return true;
            }
            if soft_seen < cap {
                soft_seen += 1;
                true
            } else {
                rejections.inc(REASON_SOFT_PASS_CAP);
                false
            }
        });

        (candidates, rejections, soft_seen)
    }

    /// Score one frozen snapshot under every known strategy's base profile.
    /// Diagnostics only: nothing is published and no lock is taken.
    pub async fn run_validation(&self) -> Result<Vec<StrategyValidation>, ScanError> {
        let now = self.clock.now();
        let session = session_at(now, self.et_utc_offset_hours);

        let warm_cache = self.cache.clone();
        let (snapshot_result, warm_result) = tokio::join!(self.provider.bulk_snapshot(), async move {
            tokio::task::spawn_blocking(move || warm_cache.warm(now)).await
        });
        let bulk = snapshot_result?;
        let averages = warm_result
            .map_err(|e| ScanError::Internal(format!("cache warm task failed: {e}")))??;

        let mut discard = RejectionCounts::new();
        let filtered = filter_universe(bulk.snapshots, &self.universe_cfg, &mut discard);
        let ranked = rank_by_momentum(filtered, self.momentum_top_k);

        let mut out = Vec::new();
        for strategy in crate::calibration::presets::known_strategies() {
            let resolved = self.calibration.resolve_base(strategy)?;
            let thresholds = resolved.thresholds_for(session);

            let mut rvol_rejections = RejectionCounts::new();
            let survivors = evaluate_rvol(
                ranked.clone(),
                &averages,
                thresholds.min_rvol,
                &mut rvol_rejections,
            );
            let rvol_survivors = survivors.len();

            let (candidates, _, _) =
                self.score_survivors(survivors, &resolved, session, "validation");

            let trade_ready = candidates
                .iter()
                .filter(|c| c.action_tag == ActionTag::TradeReady)
                .count();
            out.push(StrategyValidation {
                strategy: strategy.to_string(),
                preset: resolved.profile.active_preset.clone(),
                weights_hash: resolved.weights_hash,
                rvol_survivors,
                candidates: candidates.len(),
                trade_ready,
                top: candidates
                    .into_iter()
                    .take(10)
                    .map(|c| ValidationRow {
                        symbol: c.symbol,
                        score: c.score,
                        action_tag: c.action_tag,
                    })
                    .collect(),
            });
        }
        Ok(out)
    }
}
