// =============================================================================
// Outbound event sink — fire-and-forget scan events for the learning system
// =============================================================================
//
// The discovery core emits one JSON event per completed scan to an optional
// HTTP sink. The call is fire-and-forget with a short timeout; failures are
// logged, counted, and dropped. A consecutive-failure circuit breaker stops
// hammering a dead sink for a cooldown window. The core never imports
// learning code and never blocks a scan on the sink.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

const SINK_TIMEOUT: Duration = Duration::from_secs(2);
const BREAKER_THRESHOLD: u32 = 5;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Scan summary emitted to the learning system.
#[derive(Debug, Clone, Serialize)]
pub struct ScanEvent {
    pub event: &'static str,
    pub scan_id: String,
    pub strategy: String,
    pub generated_at: DateTime<Utc>,
    pub candidates: usize,
    pub trade_ready: usize,
    pub weights_hash: String,
}

#[derive(Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

struct SinkInner {
    client: reqwest::Client,
    url: String,
    breaker: Mutex<BreakerState>,
}

/// Fire-and-forget event emitter. A sink without a configured URL is a no-op.
pub struct EventSink {
    inner: Option<Arc<SinkInner>>,
}

impl EventSink {
    pub fn new(url: Option<String>) -> Self {
        let inner = url.map(|url| {
            let client = reqwest::Client::builder()
                .timeout(SINK_TIMEOUT)
                .build()
                .expect("failed to build reqwest client");
            Arc::new(SinkInner {
                client,
                url,
                breaker: Mutex::new(BreakerState::default()),
            })
        });
        Self { inner }
    }

    /// No-op sink for disabled configurations and tests.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Emit an event without waiting for delivery. Returns immediately; the
    /// send happens on a spawned task.
    pub fn emit(&self, event: ScanEvent) {
        let Some(inner) = self.inner.clone() else {
            return;
        };

        {
            let breaker = inner.breaker.lock();
            if let Some(open_until) = breaker.open_until {
                if open_until > Instant::now() {
                    debug!(scan_id = %event.scan_id, "event sink circuit open, dropping event");
                    return;
                }
            }
        }

        tokio::spawn(async move {
            let result = inner.client.post(&inner.url).json(&event).send().await;

            let mut breaker = inner.breaker.lock();
            match result {
                Ok(resp) if resp.status().is_success() => {
                    breaker.consecutive_failures = 0;
                    breaker.open_until = None;
                }
                Ok(resp) => {
                    record_failure(&mut breaker, &format!("sink returned {}", resp.status()));
                }
                Err(e) => {
                    record_failure(&mut breaker, &e.to_string());
                }
            }
        });
    }
}

fn record_failure(breaker: &mut BreakerState, error: &str) {
    breaker.consecutive_failures += 1;
    warn!(
        error,
        consecutive = breaker.consecutive_failures,
        "event sink delivery failed"
    );
    if breaker.consecutive_failures >= BREAKER_THRESHOLD {
        breaker.open_until = Some(Instant::now() + BREAKER_COOLDOWN);
        warn!(cooldown_s = BREAKER_COOLDOWN.as_secs(), "event sink circuit opened");
    }
}
