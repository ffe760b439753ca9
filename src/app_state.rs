// =============================================================================
// Central application state — Nova discovery engine
// =============================================================================
//
// Ties the long-lived subsystems together for the API layer and the scan
// loop. Each subsystem manages its own interior mutability; AppState adds a
// lock-free version counter and the last-scan status cell that the health
// endpoint reads.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::calibration::CalibrationStore;
use crate::clock::{session_at, Clock};
use crate::config::Settings;
use crate::events::EventSink;
use crate::pipeline::DiscoveryOrchestrator;
use crate::publish::CandidatePublisher;
use crate::trace::TraceRecorder;
use crate::types::Session;
use crate::volume_cache::VolumeCache;

/// Outcome of the most recent scan attempt, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LastScan {
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub detail: String,
}

/// Shared state handed to every axum handler and background task.
pub struct AppState {
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,

    pub calibration: Arc<CalibrationStore>,
    pub volume_cache: Arc<VolumeCache>,
    pub publisher: Arc<CandidatePublisher>,
    pub trace: Arc<TraceRecorder>,
    pub orchestrator: Arc<DiscoveryOrchestrator>,
    pub events: Arc<EventSink>,

    /// Monotonic counter bumped on every meaningful state mutation.
    pub state_version: AtomicU64,
    pub last_scan: RwLock<Option<LastScan>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        calibration: Arc<CalibrationStore>,
        volume_cache: Arc<VolumeCache>,
        publisher: Arc<CandidatePublisher>,
        trace: Arc<TraceRecorder>,
        orchestrator: Arc<DiscoveryOrchestrator>,
        events: Arc<EventSink>,
    ) -> Self {
        Self {
            settings,
            clock,
            calibration,
            volume_cache,
            publisher,
            trace,
            orchestrator,
            events,
            state_version: AtomicU64::new(1),
            last_scan: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Trading session at this instant.
    pub fn session_now(&self) -> Session {
        session_at(self.clock.now(), self.settings.et_utc_offset_hours)
    }

    /// Session-aware freshness ceiling for the read side. The configured
    /// value applies to the regular session; thin and closed sessions allow
    /// proportionally older data because no scan can produce fresher input.
    pub fn max_data_age_seconds(&self, session: Session) -> i64 {
        let base = self.settings.max_data_age_seconds as i64;
        match session {
            Session::Regular => base,
            Session::Premarket | Session::Afterhours => base * 2,
            Session::Closed => base * 12,
        }
    }

    pub fn record_scan_result(&self, ok: bool, detail: impl Into<String>) {
        *self.last_scan.write() = Some(LastScan {
            at: self.clock.now(),
            ok,
            detail: detail.into(),
        });
        self.increment_version();
    }
}
