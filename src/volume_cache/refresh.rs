// =============================================================================
// Cache refresh job — offline population of trailing volume averages
// =============================================================================
//
// Runs daily post-close (scheduled from main), or on demand in `test` mode
// (random sample of N symbols) and `stale` mode (only rows past the freshness
// window). Per-symbol failures are isolated and counted; the job as a whole
// fails only when the provider was down for everything.
//
// Backpressure: a throttled response halves the batch size and doubles the
// inter-batch delay for the remainder of the run. The job paces through the
// history rate bucket, which is separate from the hot path's snapshot bucket.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Duration;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::market_data::provider::{MarketData, ProviderError};
use crate::volume_cache::{VolumeAverage, VolumeCache};

/// Bars fetched per symbol: enough for both the 20-day and 30-day means.
const FETCH_DAYS: u32 = 30;
/// Minimum completed bars required to trust a 20-day mean.
const MIN_BARS_20D: usize = 15;
/// Minimum completed bars required to also record a 30-day mean.
const MIN_BARS_30D: usize = 25;

const MIN_BATCH_SIZE: usize = 10;
const BASE_BATCH_DELAY_MS: u64 = 250;
const MAX_BATCH_DELAY_MS: u64 = 10_000;

/// Which symbols a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Full active universe from the bulk snapshot.
    Full,
    /// Random sample of N symbols, for smoke-testing the pipeline.
    Test(usize),
    /// Only symbols whose cache rows have passed the freshness window.
    Stale,
}

/// Structured terminal outcome of one refresh run.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub mode: String,
    pub targeted: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

pub struct CacheRefreshJob {
    provider: Arc<dyn MarketData>,
    cache: Arc<VolumeCache>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    freshness_window: Duration,
}

impl CacheRefreshJob {
    pub fn new(
        provider: Arc<dyn MarketData>,
        cache: Arc<VolumeCache>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
        freshness_hours: i64,
    ) -> Self {
        Self {
            provider,
            cache,
            clock,
            batch_size: batch_size.max(1),
            freshness_window: Duration::hours(freshness_hours),
        }
    }

    /// Run one refresh pass. Returns the summary, or an error when the
    /// provider was unreachable for every symbol (cache left unchanged).
    pub async fn run(&self, mode: RefreshMode) -> Result<RefreshSummary> {
        let started = std::time::Instant::now();
        let now = self.clock.now();

        let symbols = self.resolve_targets(mode).await?;
        info!(mode = ?mode, targeted = symbols.len(), "cache refresh starting");

        let mut processed = 0usize;
        let mut skipped = 0usize;
        let mut errors = 0usize;

        let mut batch_size = self.batch_size;
        let mut batch_delay_ms = BASE_BATCH_DELAY_MS;

        let mut cursor = 0usize;
        while cursor < symbols.len() {
            let end = (cursor + batch_size).min(symbols.len());
            let batch = &symbols[cursor..end];
            cursor = end;

            let mut records = Vec::with_capacity(batch.len());
            let mut throttled = false;

            for symbol in batch {
                match self.provider.historical_bars(symbol, FETCH_DAYS).await {
                    Ok(bars) => match compute_average(symbol, &bars, now) {
                        Some(record) => records.push(record),
                        None => {
                            debug!(symbol = %symbol, bars = bars.len(), "insufficient history, skipped");
                            skipped += 1;
                        }
                    },
                    Err(ProviderError::Throttled) => {
                        throttled = true;
                        errors += 1;
                    }
                    Err(ProviderError::Auth(msg)) => {
                        // Credentials are dead; nothing further will succeed.
                        warn!(error = %msg, "refresh aborting on auth failure");
                        bail!("cache refresh aborted: {msg}");
                    }
                    Err(e) => {
                        debug!(symbol = %symbol, error = %e, "per-symbol history fetch failed");
                        errors += 1;
                    }
                }
            }

            if !records.is_empty() {
                let written = self.cache.upsert(&records)?;
                processed += written;
            }

            if throttled {
                batch_size = (batch_size / 2).max(MIN_BATCH_SIZE);
                batch_delay_ms = (batch_delay_ms * 2).min(MAX_BATCH_DELAY_MS);
                warn!(batch_size, batch_delay_ms, "provider throttling detected, backing off");
            }

            if cursor < symbols.len() {
                tokio::time::sleep(std::time::Duration::from_millis(batch_delay_ms)).await;
            }
        }

        if processed == 0 && errors > 0 {
            bail!("cache refresh failed: provider unavailable for all {errors} symbols");
        }

        let summary = RefreshSummary {
            mode: format!("{mode:?}"),
            targeted: symbols.len(),
            processed,
            skipped,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            errors = summary.errors,
            duration_ms = summary.duration_ms,
            "cache refresh finished"
        );
        Ok(summary)
    }

    async fn resolve_targets(&self, mode: RefreshMode) -> Result<Vec<String>> {
        match mode {
            RefreshMode::Stale => Ok(self
                .cache
                .stale_symbols(self.freshness_window, self.clock.now())?),
            RefreshMode::Full | RefreshMode::Test(_) => {
                let snap = self
                    .provider
                    .bulk_snapshot()
                    .await
                    .map_err(|e| anyhow::anyhow!("cannot resolve active universe: {e}"))?;
                let mut symbols: Vec<String> =
                    snap.snapshots.into_iter().map(|s| s.symbol).collect();
                if let RefreshMode::Test(n) = mode {
                    symbols.shuffle(&mut rand::thread_rng());
                    symbols.truncate(n);
                }
                Ok(symbols)
            }
        }
    }
}

/// Arithmetic mean of the trailing daily volumes. Returns `None` when there is
/// not enough history or the mean is non-positive; the cache is never fed a
/// fabricated value.
fn compute_average(
    symbol: &str,
    bars: &[crate::market_data::Bar],
    now: chrono::DateTime<chrono::Utc>,
) -> Option<VolumeAverage> {
    if bars.len() < MIN_BARS_20D {
        return None;
    }

    let last_20 = &bars[bars.len().saturating_sub(20)..];
    let mean_20 = mean_volume(last_20)?;

    let avg_30d = if bars.len() >= MIN_BARS_30D {
        mean_volume(bars)
    } else {
        None
    };

    Some(VolumeAverage {
        symbol: symbol.to_string(),
        avg_20d: mean_20,
        avg_30d,
        last_updated: now,
    })
}

fn mean_volume(bars: &[crate::market_data::Bar]) -> Option<i64> {
    if bars.is_empty() {
        return None;
    }
    let total: u64 = bars.iter().map(|b| b.volume).sum();
    let mean = (total as f64 / bars.len() as f64).round() as i64;
    (mean > 0).then_some(mean)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::market_data::provider::StaticMarketData;
    use crate::market_data::{Bar, Snapshot};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn bars(n: usize, volume: u64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap() + chrono::Days::new(i as u64),
                volume,
                close: 10.0,
            })
            .collect()
    }

    fn snapshot(symbol: &str) -> Snapshot {
        Snapshot {
            symbol: symbol.to_string(),
            name: None,
            price: 5.0,
            volume: 1_000_000,
            prev_close: 4.5,
            change_pct: 11.1,
            high: 5.5,
            low: 4.4,
            vwap: Some(5.0),
            timestamp: Utc::now(),
        }
    }

    fn fixed_clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 7, 1, 21, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn full_refresh_writes_means() {
        let mut provider = StaticMarketData::new(vec![snapshot("VIGL"), snapshot("AAPL")]);
        provider.bars.insert("VIGL".to_string(), bars(30, 450_000));
        provider.bars.insert("AAPL".to_string(), bars(30, 90_000_000));

        let cache = Arc::new(VolumeCache::open_in_memory(48).unwrap());
        let job = CacheRefreshJob::new(Arc::new(provider), cache.clone(), fixed_clock(), 100, 48);

        let summary = job.run(RefreshMode::Full).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.errors, 0);

        let now = fixed_clock().now();
        let got = cache.batch_get(&["VIGL".to_string()], now).unwrap();
        assert_eq!(got["VIGL"].avg_20d, 450_000);
        assert_eq!(got["VIGL"].avg_30d, Some(450_000));
    }

    #[tokio::test]
    async fn short_history_is_skipped_not_fabricated() {
        let mut provider = StaticMarketData::new(vec![snapshot("NEWCO")]);
        provider.bars.insert("NEWCO".to_string(), bars(10, 500_000));

        let cache = Arc::new(VolumeCache::open_in_memory(48).unwrap());
        let job = CacheRefreshJob::new(Arc::new(provider), cache.clone(), fixed_clock(), 100, 48);

        let summary = job.run(RefreshMode::Full).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(cache.row_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_bars_count_as_skipped() {
        // Provider knows the symbol but returns no bars for it.
        let provider = StaticMarketData::new(vec![snapshot("GHOST")]);
        let cache = Arc::new(VolumeCache::open_in_memory(48).unwrap());
        let job = CacheRefreshJob::new(Arc::new(provider), cache.clone(), fixed_clock(), 100, 48);

        let summary = job.run(RefreshMode::Full).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_mode_limits_targets() {
        let mut provider = StaticMarketData::new(
            (0..50).map(|i| snapshot(&format!("S{i}"))).collect(),
        );
        for i in 0..50 {
            provider.bars.insert(format!("S{i}"), bars(30, 100_000));
        }

        let cache = Arc::new(VolumeCache::open_in_memory(48).unwrap());
        let job = CacheRefreshJob::new(Arc::new(provider), cache.clone(), fixed_clock(), 100, 48);

        let summary = job.run(RefreshMode::Test(5)).await.unwrap();
        assert_eq!(summary.targeted, 5);
        assert_eq!(summary.processed, 5);
    }

    #[tokio::test]
    async fn stale_mode_targets_only_stale_rows() {
        let now = fixed_clock().now();
        let cache = Arc::new(VolumeCache::open_in_memory(48).unwrap());
        cache
            .upsert(&[
                VolumeAverage {
                    symbol: "OLD".to_string(),
                    avg_20d: 100_000,
                    avg_30d: None,
                    last_updated: now - Duration::hours(72),
                },
                VolumeAverage {
                    symbol: "NEW".to_string(),
                    avg_20d: 100_000,
                    avg_30d: None,
                    last_updated: now,
                },
            ])
            .unwrap();

        let mut provider = StaticMarketData::new(vec![]);
        provider.bars.insert("OLD".to_string(), bars(30, 250_000));

        let job = CacheRefreshJob::new(Arc::new(provider), cache.clone(), fixed_clock(), 100, 48);
        let summary = job.run(RefreshMode::Stale).await.unwrap();
        assert_eq!(summary.targeted, 1);
        assert_eq!(summary.processed, 1);

        let got = cache.batch_get(&["OLD".to_string()], now).unwrap();
        assert_eq!(got["OLD"].avg_20d, 250_000);
    }

    #[tokio::test]
    async fn global_outage_fails_without_touching_cache() {
        let mut provider = StaticMarketData::new(vec![]);
        provider.fail_snapshot = Some(|| ProviderError::Unavailable("down".to_string()));

        let cache = Arc::new(VolumeCache::open_in_memory(48).unwrap());
        let job = CacheRefreshJob::new(Arc::new(provider), cache.clone(), fixed_clock(), 100, 48);

        assert!(job.run(RefreshMode::Full).await.is_err());
        assert_eq!(cache.row_count().unwrap(), 0);
    }

    #[test]
    fn mean_rounds_and_rejects_zero() {
        assert_eq!(mean_volume(&bars(3, 100)), Some(100));
        assert_eq!(mean_volume(&bars(3, 0)), None);
        assert_eq!(mean_volume(&[]), None);
    }
}
