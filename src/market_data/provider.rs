// =============================================================================
// Market-data provider client — bulk snapshot + daily aggregates
// =============================================================================
//
// Two upstream endpoint classes are consumed, each behind its own rate
// bucket:
//
//   GET /v1/snapshot/us/equities          -> every active US equity's quote
//   GET /v1/bars/{symbol}/daily?days=N    -> last N completed daily bars
//
// Failure policy: transient transport errors and 5xx/429 are retried up to 3
// attempts with jittered exponential backoff (base 250 ms, cap 5 s). Auth
// failures are never retried; they trip a circuit that fails every further
// call fast until a config reload resets it. Missing data is never
// synthesized here or anywhere downstream.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::market_data::rate_limit::TokenBucket;
use crate::market_data::{sanitize_snapshots, Bar, Snapshot, WireSnapshot};

/// Typed upstream failure kinds (see error-handling design).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider authentication failed: {0}")]
    Auth(String),
    #[error("provider throttled the request")]
    Throttled,
    #[error("provider returned a malformed payload: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Throttled)
    }
}

/// Result of one bulk snapshot call: validated rows plus the count of rows
/// dropped at the ingest boundary.
#[derive(Debug, Clone)]
pub struct BulkSnapshot {
    pub snapshots: Vec<Snapshot>,
    pub dropped_rows: u64,
}

/// Upstream market-data access, behind a trait so the orchestrator and the
/// refresh job can be exercised against canned data.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn bulk_snapshot(&self) -> Result<BulkSnapshot, ProviderError>;
    async fn historical_bars(&self, symbol: &str, n_days: u32) -> Result<Vec<Bar>, ProviderError>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_CAP_MS: u64 = 5_000;

#[derive(Deserialize)]
struct SnapshotEnvelope {
    tickers: Vec<WireSnapshot>,
}

#[derive(Deserialize)]
struct BarsEnvelope {
    bars: Vec<WireBar>,
}

#[derive(Deserialize)]
struct WireBar {
    date: chrono::NaiveDate,
    volume: i64,
    close: f64,
}

/// HTTP market-data client with retry, auth circuit, and per-class pacing.
pub struct HttpMarketData {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    snapshot_bucket: TokenBucket,
    history_bucket: TokenBucket,
    auth_blocked: AtomicBool,
    /// Total retries performed, for the debug endpoint.
    retries: AtomicU64,
}

impl HttpMarketData {
    pub fn new(settings: &Settings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: settings.provider_base_url.trim_end_matches('/').to_string(),
            api_key: settings.provider_api_key.clone(),
            snapshot_bucket: TokenBucket::new(settings.snapshot_bucket),
            history_bucket: TokenBucket::new(settings.history_bucket),
            auth_blocked: AtomicBool::new(false),
            retries: AtomicU64::new(0),
        }
    }

    /// Clear the auth circuit after a credentials reload.
    pub fn reset_auth_circuit(&self) {
        self.auth_blocked.store(false, Ordering::SeqCst);
    }

    pub fn auth_circuit_open(&self) -> bool {
        self.auth_blocked.load(Ordering::SeqCst)
    }

    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(5));
        let capped = exp.min(BACKOFF_CAP_MS);
        // Jitter in [0, capped/2) spreads concurrent retries apart.
        let jitter = rand::thread_rng().gen_range(0..=capped / 2);
        Duration::from_millis(capped + jitter)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        op: &'static str,
    ) -> Result<T, ProviderError> {
        if self.auth_blocked.load(Ordering::SeqCst) {
            return Err(ProviderError::Auth("auth circuit open".to_string()));
        }

        let mut last_err: Option<ProviderError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Self::backoff_delay(attempt - 1);
                self.retries.fetch_add(1, Ordering::Relaxed);
                debug!(op, attempt, delay_ms = delay.as_millis() as u64, "retrying provider call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .get(url)
                .header("X-API-KEY", &self.api_key)
                .send()
                .await;

            let err = match resp {
                Err(e) => ProviderError::Unavailable(e.to_string()),
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .map_err(|e| ProviderError::Malformed(e.to_string()));
                    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        ProviderError::Throttled
                    } else if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        self.auth_blocked.store(true, Ordering::SeqCst);
                        warn!(op, %status, "provider rejected credentials, circuit opened");
                        ProviderError::Auth(format!("{op} returned {status}"))
                    } else {
                        ProviderError::Unavailable(format!("{op} returned {status}"))
                    }
                }
            };

            if !err.is_retryable() {
                return Err(err);
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("exhausted retries".to_string())))
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn bulk_snapshot(&self) -> Result<BulkSnapshot, ProviderError> {
        self.snapshot_bucket.acquire(1.0).await;

        let url = format!("{}/v1/snapshot/us/equities", self.base_url);
        let envelope: SnapshotEnvelope = self.get_json(&url, "bulk_snapshot").await?;

        let total = envelope.tickers.len();
        let (snapshots, dropped_rows) = sanitize_snapshots(envelope.tickers, Utc::now());
        debug!(total, kept = snapshots.len(), dropped = dropped_rows, "bulk snapshot fetched");

        Ok(BulkSnapshot {
            snapshots,
            dropped_rows,
        })
    }

    async fn historical_bars(&self, symbol: &str, n_days: u32) -> Result<Vec<Bar>, ProviderError> {
        self.history_bucket.acquire(1.0).await;

        let url = format!("{}/v1/bars/{}/daily?days={}", self.base_url, symbol, n_days);
        let envelope: BarsEnvelope = self.get_json(&url, "historical_bars").await?;

        let bars = envelope
            .bars
            .into_iter()
            .filter(|b| b.volume >= 0 && b.close > 0.0)
            .map(|b| Bar {
                date: b.date,
                volume: b.volume as u64,
                close: b.close,
            })
            .collect();

        Ok(bars)
    }
}

// =============================================================================
// Canned implementation for tests
// =============================================================================

#[cfg(test)]
pub struct StaticMarketData {
    pub snapshots: Vec<Snapshot>,
    pub bars: std::collections::HashMap<String, Vec<Bar>>,
    pub fail_snapshot: Option<fn() -> ProviderError>,
}

#[cfg(test)]
impl StaticMarketData {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self {
            snapshots,
            bars: std::collections::HashMap::new(),
            fail_snapshot: None,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl MarketData for StaticMarketData {
    async fn bulk_snapshot(&self) -> Result<BulkSnapshot, ProviderError> {
        if let Some(make_err) = self.fail_snapshot {
            return Err(make_err());
        }
        Ok(BulkSnapshot {
            snapshots: self.snapshots.clone(),
            dropped_rows: 0,
        })
    }

    async fn historical_bars(&self, symbol: &str, _n_days: u32) -> Result<Vec<Bar>, ProviderError> {
        match self.bars.get(symbol) {
            Some(bars) => Ok(bars.clone()),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let d0 = HttpMarketData::backoff_delay(0);
        let d3 = HttpMarketData::backoff_delay(3);
        let d9 = HttpMarketData::backoff_delay(9);
        assert!(d0 >= Duration::from_millis(250));
        assert!(d3 >= Duration::from_millis(2_000));
        // Cap 5s plus at most 50% jitter.
        assert!(d9 <= Duration::from_millis(7_500));
    }

    #[test]
    fn auth_errors_are_not_retryable() {
        assert!(!ProviderError::Auth("nope".to_string()).is_retryable());
        assert!(!ProviderError::Malformed("bad json".to_string()).is_retryable());
        assert!(ProviderError::Throttled.is_retryable());
        assert!(ProviderError::Unavailable("timeout".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn static_provider_returns_canned_rows() {
        let provider = StaticMarketData::new(vec![]);
        let snap = provider.bulk_snapshot().await.unwrap();
        assert!(snap.snapshots.is_empty());
        assert_eq!(snap.dropped_rows, 0);
    }
}
