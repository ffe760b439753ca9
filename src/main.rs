// =============================================================================
// Nova Screener — Main Entry Point
// =============================================================================
//
// Wires the discovery engine together: volume cache, calibration store,
// market-data client, orchestrator, API server, and the background loops
// (scan cadence + daily cache refresh). All subsystems are constructed here
// and injected; nothing reaches for a global.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod calibration;
mod clock;
mod config;
mod events;
mod market_data;
mod pipeline;
mod publish;
mod scoring;
mod trace;
mod types;
mod volume_cache;

use std::sync::Arc;

use chrono::Timelike;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::calibration::CalibrationStore;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::events::EventSink;
use crate::market_data::provider::HttpMarketData;
use crate::pipeline::{DiscoveryOrchestrator, ScanError};
use crate::publish::{ArtifactStore, CandidatePublisher};
use crate::scoring::NoEnrichment;
use crate::trace::TraceRecorder;
use crate::volume_cache::refresh::{CacheRefreshJob, RefreshMode};
use crate::volume_cache::VolumeCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    info!(
        strategy = %settings.strategy,
        bind_addr = %settings.bind_addr,
        scan_interval_s = settings.scan_interval_seconds,
        "Nova Screener starting up"
    );

    if settings.provider_api_key.is_empty() {
        warn!("NOVA_PROVIDER_API_KEY is not set; every scan will fail until it is");
    }
    if settings.admin_token.is_empty() {
        warn!("NOVA_ADMIN_TOKEN is not set; calibration mutators will reject every request");
    }

    // ── 2. Build shared subsystems ───────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let volume_cache = Arc::new(VolumeCache::open(
        &settings.cache_db_path,
        settings.cache_freshness_hours,
    )?);

    let calibration = Arc::new(CalibrationStore::new(
        Some(settings.calibration_path.clone().into()),
        clock.clone(),
    ));

    // MIN_RVOL_DEFAULT overrides the shipped baseline across strategies; the
    // calibration store stays the single source of truth afterwards.
    if (settings.min_rvol_default - 1.5).abs() > f64::EPSILON {
        let patch = calibration::CalibrationPatch {
            thresholds: Some(calibration::ThresholdsPatch {
                min_rvol: Some(settings.min_rvol_default),
                ..calibration::ThresholdsPatch::default()
            }),
            ..calibration::CalibrationPatch::default()
        };
        for strategy in calibration::presets::known_strategies() {
            if let Err(e) = calibration.patch(strategy, &patch) {
                warn!(strategy, error = %e, "failed to apply MIN_RVOL_DEFAULT override");
            }
        }
    }

    let artifact_store = Arc::new(ArtifactStore::new());
    let publisher = Arc::new(CandidatePublisher::new(
        artifact_store,
        settings.artifact_ttl_seconds,
    ));

    let trace = Arc::new(TraceRecorder::default());
    let events = Arc::new(EventSink::new(settings.event_sink_url.clone()));
    let provider = Arc::new(HttpMarketData::new(&settings));

    let orchestrator = Arc::new(DiscoveryOrchestrator::new(
        &settings,
        provider.clone(),
        volume_cache.clone(),
        calibration.clone(),
        Arc::new(NoEnrichment),
        publisher.clone(),
        trace.clone(),
        events.clone(),
        clock.clone(),
    ));

    let state = Arc::new(AppState::new(
        settings.clone(),
        clock.clone(),
        calibration,
        volume_cache.clone(),
        publisher,
        trace,
        orchestrator.clone(),
        events,
    ));

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = settings.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 4. Scan loop ─────────────────────────────────────────────────────
    let scan_state = state.clone();
    let scan_orchestrator = orchestrator.clone();
    let scan_strategy = settings.strategy.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
            scan_state.settings.scan_interval_seconds.max(5),
        ));
        loop {
            interval.tick().await;

            match scan_orchestrator.run_scan(&scan_strategy).await {
                Ok(report) => {
                    scan_state.record_scan_result(
                        true,
                        format!(
                            "{} candidates ({} trade_ready) in {} ms",
                            report.candidates, report.trade_ready, report.duration_ms
                        ),
                    );
                }
                Err(ScanError::AlreadyRunning) => {
                    warn!(strategy = %scan_strategy, "previous scan still in flight, skipping tick");
                }
                Err(e) => {
                    error!(strategy = %scan_strategy, error = %e, "scan failed");
                    scan_state.record_scan_result(false, e.to_string());
                }
            }
        }
    });

    // ── 5. Cache refresh: optional catch-up at startup ───────────────────
    let refresh_job = Arc::new(CacheRefreshJob::new(
        provider.clone(),
        volume_cache.clone(),
        clock.clone(),
        settings.refresh_batch_size,
        settings.cache_freshness_hours,
    ));

    if let Ok(mode) = std::env::var("NOVA_REFRESH_ON_START") {
        if let Some(mode) = parse_refresh_mode(&mode) {
            let job = refresh_job.clone();
            tokio::spawn(async move {
                match job.run(mode).await {
                    Ok(summary) => info!(?summary, "startup cache refresh finished"),
                    Err(e) => error!(error = %e, "startup cache refresh failed"),
                }
            });
        } else {
            warn!(mode = %mode, "unrecognised NOVA_REFRESH_ON_START value, ignoring");
        }
    }

    // ── 6. Daily post-close refresh scheduler ────────────────────────────
    let sched_clock = clock.clone();
    let refresh_hour = settings.refresh_hour_utc;
    tokio::spawn(async move {
        let mut last_run_date: Option<chrono::NaiveDate> = None;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
        loop {
            interval.tick().await;

            let now = sched_clock.now();
            let today = now.date_naive();
            if now.hour() == refresh_hour && last_run_date != Some(today) {
                info!(hour = refresh_hour, "daily cache refresh triggered");
                match refresh_job.run(RefreshMode::Full).await {
                    Ok(summary) => {
                        last_run_date = Some(today);
                        info!(?summary, "daily cache refresh finished");
                    }
                    Err(e) => error!(error = %e, "daily cache refresh failed"),
                }
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    info!("Nova Screener shut down complete.");
    Ok(())
}

fn parse_refresh_mode(raw: &str) -> Option<RefreshMode> {
    match raw.trim().to_lowercase().as_str() {
        "full" => Some(RefreshMode::Full),
        "stale" => Some(RefreshMode::Stale),
        other => other
            .strip_prefix("test:")
            .and_then(|n| n.parse().ok())
            .map(RefreshMode::Test),
    }
}
