// =============================================================================
// REST API endpoints — axum 0.7
// =============================================================================
//
// All endpoints live under `/discovery`. Read-side endpoints are public;
// calibration mutators are admin-only via the `RequireAdmin` extractor.
// CORS is configured permissively for development.
//
// The read contract: a missing, stale, or fabrication-tainted artifact is NOT
// an HTTP error. The API answers 200 with an empty candidate list and a
// DEGRADED system state carrying a human-readable reason. Only genuine
// infrastructure failures yield 503.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::RequireAdmin;
use crate::app_state::AppState;
use crate::calibration::{CalibrationError, CalibrationPatch};
use crate::pipeline::ScanError;
use crate::publish::ScanArtifact;
use crate::scoring::Candidate;
use crate::types::{Session, SystemState};

pub const REASON_NO_ARTIFACT: &str = "no_artifact";
pub const REASON_STALE: &str = "stale_artifact";
pub const REASON_FABRICATED: &str = "fabricated_inputs_detected";
pub const REASON_EMPTY: &str = "no_candidates";

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Read side (public) ──────────────────────────────────────
        .route("/discovery/contenders", get(contenders))
        .route("/discovery/contenders/raw", get(contenders_raw))
        .route("/discovery/contenders/debug", get(contenders_debug))
        .route("/discovery/health", get(health))
        .route("/discovery/strategy-validation", get(strategy_validation))
        .route("/discovery/calibration/:strategy/config", get(calibration_config))
        // ── Calibration mutators (authenticated) ────────────────────
        .route("/discovery/calibration/:strategy", patch(calibration_patch))
        .route("/discovery/calibration/:strategy/preset", patch(calibration_preset))
        .route("/discovery/calibration/:strategy/reset", post(calibration_reset))
        .route(
            "/discovery/calibration/emergency/force-legacy",
            post(force_legacy),
        )
        // ── Middleware & state ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Contenders read path
// =============================================================================

#[derive(Debug, Deserialize)]
struct ContendersQuery {
    strategy: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ContendersMeta {
    system_state: SystemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    session: Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_age_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weights_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContendersResponse {
    candidates: Vec<Candidate>,
    count: usize,
    strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_at: Option<DateTime<Utc>>,
    meta: ContendersMeta,
}

/// Apply the freshness and anti-fabrication contract to the stored artifact.
/// Returns the (possibly emptied) candidate list plus metadata.
fn resolve_contenders(state: &AppState, strategy: &str, limit: usize) -> ContendersResponse {
    let session = state.session_now();
    let now = state.clock.now();

    let degraded = |reason: &'static str,
                    artifact: Option<&ScanArtifact>,
                    age: Option<i64>| ContendersResponse {
        candidates: Vec::new(),
        count: 0,
        strategy: strategy.to_string(),
        generated_at: artifact.map(|a| a.generated_at),
        meta: ContendersMeta {
            system_state: SystemState::Degraded,
            reason: Some(reason),
            session,
            data_age_seconds: age,
            scan_id: artifact.map(|a| a.scan_id.clone()),
            preset: artifact.map(|a| a.preset.clone()),
            weights_hash: artifact.map(|a| a.weights_hash.clone()),
        },
    };

    let Some(artifact) = state.publisher.read(strategy) else {
        return degraded(REASON_NO_ARTIFACT, None, None);
    };

    let age = (now - artifact.generated_at).num_seconds();
    if age > state.max_data_age_seconds(session) {
        warn!(strategy, age, "artifact is stale, returning degraded empty list");
        return degraded(REASON_STALE, Some(&artifact), Some(age));
    }

    // Fabrication guard: one tainted candidate suppresses the entire list.
    // Placeholder constants sneaking through a fallback source are corruption,
    // not data, and a partially sanitized list would hide that.
    if artifact
        .candidates
        .iter()
        .any(|c| c.factors.has_banned_fabrication())
    {
        warn!(strategy, scan_id = %artifact.scan_id, "banned default detected, suppressing artifact");
        return degraded(REASON_FABRICATED, Some(&artifact), Some(age));
    }

    if artifact.candidates.is_empty() {
        return degraded(REASON_EMPTY, Some(&artifact), Some(age));
    }

    let mut candidates = artifact.candidates;
    candidates.truncate(limit);
    ContendersResponse {
        count: candidates.len(),
        strategy: strategy.to_string(),
        generated_at: Some(artifact.generated_at),
        meta: ContendersMeta {
            system_state: SystemState::Healthy,
            reason: None,
            session,
            data_age_seconds: Some(age),
            scan_id: Some(artifact.scan_id),
            preset: Some(artifact.preset),
            weights_hash: Some(artifact.weights_hash),
        },
        candidates,
    }
}

async fn contenders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContendersQuery>,
) -> impl IntoResponse {
    let strategy = query
        .strategy
        .unwrap_or_else(|| state.settings.strategy.clone());
    let limit = query
        .limit
        .unwrap_or(state.settings.max_candidates)
        .min(state.settings.max_candidates);
    Json(resolve_contenders(&state, &strategy, limit))
}

/// Unfiltered artifact for diagnostics: no freshness or fabrication checks.
async fn contenders_raw(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContendersQuery>,
) -> impl IntoResponse {
    let strategy = query
        .strategy
        .unwrap_or_else(|| state.settings.strategy.clone());
    Json(state.publisher.read(&strategy))
}

// =============================================================================
// Debug
// =============================================================================

async fn contenders_debug(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContendersQuery>,
) -> impl IntoResponse {
    let strategy = query
        .strategy
        .unwrap_or_else(|| state.settings.strategy.clone());
    let session = state.session_now();
    let now = state.clock.now();

    let artifact = state.publisher.read(&strategy);
    let trace = state.trace.latest_for(&strategy);
    let resolved = state.calibration.resolve(&strategy).ok();

    let body = serde_json::json!({
        "strategy": strategy,
        "session": session,
        "state_version": state.current_state_version(),
        "calibration_version": state.calibration.version(),
        "active_override": state.calibration.active_override(),
        "resolved": resolved.as_ref().map(|r| serde_json::json!({
            "effective_strategy": r.profile.strategy,
            "preset": r.profile.active_preset,
            "weights": r.profile.weights,
            "weights_hash": r.weights_hash,
            "thresholds": r.thresholds_for(session),
            "entry_rules": r.profile.entry_rules,
            "forced": r.forced,
            "profile_version": r.profile.version,
        })),
        "artifact": artifact.as_ref().map(|a| serde_json::json!({
            "scan_id": a.scan_id,
            "generated_at": a.generated_at,
            "data_age_seconds": (now - a.generated_at).num_seconds(),
            "stats": a.stats,
            "candidates": a.candidates.len(),
        })),
        "rejections": trace.as_ref().map(|t| t.rejection_histogram()),
        "stages": trace.as_ref().map(|t| &t.stages),
        "last_scan": state.last_scan.read().clone(),
    });
    Json(body)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize)]
struct ComponentHealth {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session_now();
    let now = state.clock.now();

    let env_ok = !state.settings.provider_api_key.is_empty();
    let env = ComponentHealth {
        ok: env_ok,
        detail: (!env_ok).then(|| "provider credentials missing".to_string()),
    };

    let db_ok = state.volume_cache.ping();
    let cache_rows = state.volume_cache.row_count().unwrap_or(0);
    let db = ComponentHealth {
        ok: db_ok,
        detail: Some(format!("{cache_rows} volume averages")),
    };

    let artifact = state.publisher.read(&state.settings.strategy);
    let data_age = artifact.as_ref().map(|a| (now - a.generated_at).num_seconds());
    let cache_fresh = data_age
        .map(|age| age <= state.max_data_age_seconds(session))
        .unwrap_or(false);
    let cache = ComponentHealth {
        ok: cache_fresh,
        detail: match data_age {
            Some(age) => Some(format!("artifact age {age}s")),
            None => Some("no artifact published".to_string()),
        },
    };

    let last_scan = state.last_scan.read().clone();
    let provider_ok = last_scan.as_ref().map(|s| s.ok).unwrap_or(false);
    let provider = ComponentHealth {
        ok: provider_ok,
        detail: last_scan.map(|s| s.detail),
    };

    let system_state = if env.ok && db.ok && cache.ok && provider.ok {
        SystemState::Healthy
    } else {
        SystemState::Degraded
    };

    Json(serde_json::json!({
        "system_state": system_state,
        "session": session,
        "components": {
            "env": env,
            "db": db,
            "cache": cache,
            "provider": provider,
        },
        "data_age_seconds": data_age,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "state_version": state.current_state_version(),
    }))
}

// =============================================================================
// Strategy validation
// =============================================================================

async fn strategy_validation(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.run_validation().await {
        Ok(results) => Json(serde_json::json!({ "strategies": results })).into_response(),
        Err(e @ (ScanError::Provider(_) | ScanError::Cache(_) | ScanError::Internal(_))) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// =============================================================================
// Calibration endpoints
// =============================================================================

fn calibration_error_response(e: CalibrationError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        CalibrationError::UnknownStrategy(_) | CalibrationError::UnknownPreset(_) => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

async fn calibration_config(
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
) -> impl IntoResponse {
    match state.calibration.resolve(&strategy) {
        Ok(resolved) => Json(serde_json::json!({
            "strategy": strategy,
            "effective_strategy": resolved.profile.strategy,
            "forced": resolved.forced,
            "preset": resolved.profile.active_preset,
            "weights": resolved.profile.weights,
            "weights_hash": resolved.weights_hash,
            "thresholds": resolved.profile.thresholds,
            "entry_rules": resolved.profile.entry_rules,
            "session_overrides": resolved.profile.session_overrides,
            "version": resolved.profile.version,
            "store_version": resolved.store_version,
        }))
        .into_response(),
        Err(e) => calibration_error_response(e).into_response(),
    }
}

async fn calibration_patch(
    _auth: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
    Json(patch): Json<CalibrationPatch>,
) -> impl IntoResponse {
    match state.calibration.patch(&strategy, &patch) {
        Ok(resolved) => {
            state.increment_version();
            info!(strategy, version = resolved.profile.version, "calibration patched via API");
            Json(serde_json::json!({
                "strategy": strategy,
                "weights": resolved.profile.weights,
                "weights_hash": resolved.weights_hash,
                "thresholds": resolved.profile.thresholds,
                "entry_rules": resolved.profile.entry_rules,
                "version": resolved.profile.version,
            }))
            .into_response()
        }
        Err(e) => calibration_error_response(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct PresetQuery {
    name: String,
}

async fn calibration_preset(
    _auth: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
    Query(query): Query<PresetQuery>,
) -> impl IntoResponse {
    match state.calibration.set_preset(&strategy, &query.name) {
        Ok(resolved) => {
            state.increment_version();
            info!(strategy, preset = %query.name, "preset swapped via API");
            Json(serde_json::json!({
                "strategy": strategy,
                "preset": resolved.profile.active_preset,
                "weights": resolved.profile.weights,
                "weights_hash": resolved.weights_hash,
                "version": resolved.profile.version,
            }))
            .into_response()
        }
        Err(e) => calibration_error_response(e).into_response(),
    }
}

async fn calibration_reset(
    _auth: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(strategy): Path<String>,
) -> impl IntoResponse {
    match state.calibration.reset(&strategy) {
        Ok(resolved) => {
            state.increment_version();
            info!(strategy, "calibration reset via API");
            Json(serde_json::json!({
                "strategy": strategy,
                "preset": resolved.profile.active_preset,
                "weights": resolved.profile.weights,
                "weights_hash": resolved.weights_hash,
                "version": resolved.profile.version,
            }))
            .into_response()
        }
        Err(e) => calibration_error_response(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ForceLegacyRequest {
    #[serde(default = "default_forced_strategy")]
    strategy: String,
    #[serde(default = "default_override_ttl")]
    ttl_seconds: i64,
}

fn default_forced_strategy() -> String {
    crate::calibration::presets::STRATEGY_LEGACY_V0.to_string()
}

fn default_override_ttl() -> i64 {
    900
}

async fn force_legacy(
    _auth: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForceLegacyRequest>,
) -> impl IntoResponse {
    match state
        .calibration
        .force_strategy(&req.strategy, chrono::Duration::seconds(req.ttl_seconds))
    {
        Ok(override_) => {
            state.increment_version();
            warn!(forced = %override_.forced_strategy, expires_at = %override_.expires_at, "emergency override installed via API");
            Json(serde_json::json!({
                "forced_strategy": override_.forced_strategy,
                "expires_at": override_.expires_at,
            }))
            .into_response()
        }
        Err(e) => calibration_error_response(e).into_response(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::presets::STRATEGY_HYBRID_V1;
    use crate::calibration::CalibrationStore;
    use crate::clock::{Clock, FixedClock};
    use crate::config::Settings;
    use crate::events::EventSink;
    use crate::market_data::provider::StaticMarketData;
    use crate::pipeline::DiscoveryOrchestrator;
    use crate::publish::{ArtifactStore, CandidatePublisher, ScanArtifact, ScanStats};
    use crate::scoring::inputs::{EmaCross, FactorSet, Input, Source};
    use crate::scoring::{NoEnrichment, Subscores};
    use crate::trace::TraceRecorder;
    use crate::types::{ActionTag, FloatClass};
    use crate::volume_cache::VolumeCache;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn factors(short_interest: Input<f64>) -> FactorSet {
        FactorSet {
            relvol_30: Input::known(20.9, Source::Derived),
            atr_pct: Input::known(0.09, Source::Derived),
            vwap_reclaimed: Input::known(true, Source::Derived),
            uptrend_days: Input::missing("no_enrichment_source"),
            float_shares_m: Input::known(42.0, Source::Enrichment),
            short_interest,
            borrow_fee: Input::missing("no_enrichment_source"),
            utilization: Input::missing("no_enrichment_source"),
            news_score: Input::known(0.8, Source::Enrichment),
            social_rank: Input::missing("no_enrichment_source"),
            call_put_ratio: Input::missing("no_enrichment_source"),
            iv_percentile: Input::missing("no_enrichment_source"),
            ema_cross: Input::known(EmaCross::Bull, Source::Enrichment),
            rsi: Input::known(68.0, Source::Enrichment),
        }
    }

    fn candidate(symbol: &str, short_interest: Input<f64>) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            scan_id: "scan-1".to_string(),
            price: 3.20,
            rvol: 20.9,
            float_class: FloatClass::Small,
            factors: factors(short_interest),
            subscores: Subscores {
                volume_momentum: 0.88,
                squeeze: 0.5,
                catalyst: 0.48,
                options: 0.0,
                technical: 1.0,
            },
            score: 0.78,
            action_tag: ActionTag::TradeReady,
            soft_pass: false,
            mid_float_alt: false,
            strategy: STRATEGY_HYBRID_V1.to_string(),
            preset: "balanced_default".to_string(),
            weights_hash: "hash".to_string(),
            flags: Vec::new(),
        }
    }

    fn artifact_with(candidates: Vec<Candidate>, generated_at: chrono::DateTime<Utc>) -> ScanArtifact {
        ScanArtifact {
            scan_id: "scan-1".to_string(),
            generated_at,
            strategy: STRATEGY_HYBRID_V1.to_string(),
            preset: "balanced_default".to_string(),
            weights_hash: "hash".to_string(),
            candidates,
            stats: ScanStats::default(),
            trace_ref: "scan-1".to_string(),
        }
    }

    fn app_state(now: chrono::DateTime<Utc>) -> Arc<AppState> {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now));
        let settings = Settings::from_env();
        let cache = Arc::new(VolumeCache::open_in_memory(48).unwrap());
        let store = Arc::new(ArtifactStore::new());
        let publisher = Arc::new(CandidatePublisher::new(store, 600));
        let trace = Arc::new(TraceRecorder::default());
        let calibration = Arc::new(CalibrationStore::new(None, clock.clone()));
        let events = Arc::new(EventSink::disabled());
        let orchestrator = Arc::new(DiscoveryOrchestrator::new(
            &settings,
            Arc::new(StaticMarketData::new(vec![])),
            cache.clone(),
            calibration.clone(),
            Arc::new(NoEnrichment),
            publisher.clone(),
            trace.clone(),
            events.clone(),
            clock.clone(),
        ));
        Arc::new(AppState::new(
            settings,
            clock,
            calibration,
            cache,
            publisher,
            trace,
            orchestrator,
            events,
        ))
    }

    // 14:00 UTC on a Wednesday = regular session at the default -4 offset.
    fn regular_now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 14, 0, 0).unwrap()
    }

    #[test]
    fn no_artifact_reads_degraded_empty() {
        let state = app_state(regular_now());
        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 50);
        assert_eq!(resp.count, 0);
        assert_eq!(resp.meta.system_state, SystemState::Degraded);
        assert_eq!(resp.meta.reason, Some(REASON_NO_ARTIFACT));
    }

    #[test]
    fn fresh_artifact_reads_healthy() {
        let now = regular_now();
        let state = app_state(now);
        state
            .publisher
            .publish(&artifact_with(
                vec![candidate("VIGL", Input::known(0.35, Source::Enrichment))],
                now - ChronoDuration::seconds(30),
            ))
            .unwrap();

        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 50);
        assert_eq!(resp.count, 1);
        assert_eq!(resp.meta.system_state, SystemState::Healthy);
        assert_eq!(resp.meta.reason, None);
        assert_eq!(resp.meta.data_age_seconds, Some(30));
    }

    #[test]
    fn stale_artifact_reads_degraded_empty() {
        let now = regular_now();
        let state = app_state(now);
        state
            .publisher
            .publish(&artifact_with(
                vec![candidate("VIGL", Input::known(0.35, Source::Enrichment))],
                now - ChronoDuration::seconds(301),
            ))
            .unwrap();

        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 50);
        assert_eq!(resp.count, 0);
        assert_eq!(resp.meta.system_state, SystemState::Degraded);
        assert_eq!(resp.meta.reason, Some(REASON_STALE));
    }

    #[test]
    fn fabricated_input_suppresses_entire_list() {
        let now = regular_now();
        let state = app_state(now);
        // One clean candidate plus one carrying short_interest = 0.15 from a
        // sector fallback: the whole list must go, not just the tainted row.
        state
            .publisher
            .publish(&artifact_with(
                vec![
                    candidate("GOOD", Input::known(0.35, Source::Enrichment)),
                    candidate("EVIL", Input::known(0.15, Source::SectorFallback)),
                ],
                now - ChronoDuration::seconds(10),
            ))
            .unwrap();

        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 50);
        assert_eq!(resp.count, 0);
        assert!(resp.candidates.is_empty());
        assert_eq!(resp.meta.system_state, SystemState::Degraded);
        assert_eq!(resp.meta.reason, Some(REASON_FABRICATED));
    }

    #[test]
    fn attributed_same_value_is_not_fabrication() {
        let now = regular_now();
        let state = app_state(now);
        // 0.15 short interest from a real enrichment feed is data, not a
        // placeholder.
        state
            .publisher
            .publish(&artifact_with(
                vec![candidate("FINE", Input::known(0.15, Source::Enrichment))],
                now - ChronoDuration::seconds(10),
            ))
            .unwrap();

        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 50);
        assert_eq!(resp.count, 1);
        assert_eq!(resp.meta.system_state, SystemState::Healthy);
    }

    #[test]
    fn empty_artifact_reads_degraded_with_reason() {
        let now = regular_now();
        let state = app_state(now);
        state
            .publisher
            .publish(&artifact_with(vec![], now - ChronoDuration::seconds(5)))
            .unwrap();

        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 50);
        assert_eq!(resp.count, 0);
        assert_eq!(resp.meta.system_state, SystemState::Degraded);
        assert_eq!(resp.meta.reason, Some(REASON_EMPTY));
    }

    #[test]
    fn limit_caps_the_returned_list() {
        let now = regular_now();
        let state = app_state(now);
        let candidates = (0..10)
            .map(|i| candidate(&format!("S{i}"), Input::known(0.35, Source::Enrichment)))
            .collect();
        state
            .publisher
            .publish(&artifact_with(candidates, now - ChronoDuration::seconds(5)))
            .unwrap();

        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 3);
        assert_eq!(resp.count, 3);
        assert_eq!(resp.candidates.len(), 3);
    }

    #[test]
    fn closed_session_relaxes_freshness() {
        // Saturday: closed session; a 30-minute-old artifact is still served.
        let now = Utc.with_ymd_and_hms(2026, 7, 4, 14, 0, 0).unwrap();
        let state = app_state(now);
        state
            .publisher
            .publish(&artifact_with(
                vec![candidate("VIGL", Input::known(0.35, Source::Enrichment))],
                now - ChronoDuration::minutes(30),
            ))
            .unwrap();

        let resp = resolve_contenders(&state, STRATEGY_HYBRID_V1, 50);
        assert_eq!(resp.meta.system_state, SystemState::Healthy);
        assert_eq!(resp.count, 1);
    }
}
