// =============================================================================
// Market data — snapshot/bar types and the ingest boundary
// =============================================================================
//
// All upstream rows pass through `sanitize_snapshots` exactly once. Rows that
// violate the data-model invariants (zero price, negative volume, malformed
// ticker) are dropped and counted, never repaired. Everything downstream can
// therefore assume: price > 0, volume >= 0, prev_close >= 0, change_pct
// finite, and change_pct == 0 whenever prev_close == 0.
// =============================================================================

pub mod provider;
pub mod rate_limit;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::normalize_symbol;

/// One market observation for a symbol at scan time. Created per scan,
/// consumed within the run, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub price: f64,
    pub volume: u64,
    pub prev_close: f64,
    /// Percent change vs. previous close, derived at the boundary.
    pub change_pct: f64,
    pub high: f64,
    pub low: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// One completed daily bar, used only by the cache refresh job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub volume: u64,
    pub close: f64,
}

/// Raw upstream snapshot row, before boundary validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSnapshot {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    pub price: f64,
    /// Signed on the wire: some providers emit -1 for "no data".
    pub volume: i64,
    #[serde(default)]
    pub prev_close: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
    /// Milliseconds since epoch of the provider's last update.
    #[serde(default)]
    pub updated_ms: i64,
}

/// Validate raw rows into `Snapshot`s. Returns the survivors and the count of
/// rows dropped for integrity violations.
pub fn sanitize_snapshots(raw: Vec<WireSnapshot>, now: DateTime<Utc>) -> (Vec<Snapshot>, u64) {
    let mut out = Vec::with_capacity(raw.len());
    let mut dropped: u64 = 0;

    for row in raw {
        let Some(symbol) = normalize_symbol(&row.ticker) else {
            dropped += 1;
            continue;
        };
        if row.price <= 0.0 || !row.price.is_finite() || row.volume < 0 || row.prev_close < 0.0 {
            dropped += 1;
            continue;
        }

        let change_pct = if row.prev_close > 0.0 {
            (row.price - row.prev_close) / row.prev_close * 100.0
        } else {
            0.0
        };

        let timestamp = DateTime::<Utc>::from_timestamp_millis(row.updated_ms).unwrap_or(now);

        out.push(Snapshot {
            symbol,
            name: row.name,
            price: row.price,
            volume: row.volume as u64,
            prev_close: row.prev_close,
            change_pct,
            high: if row.high > 0.0 { row.high } else { row.price },
            low: if row.low > 0.0 { row.low } else { row.price },
            vwap: row.vwap.filter(|v| *v > 0.0),
            timestamp,
        });
    }

    (out, dropped)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn wire(ticker: &str, price: f64, volume: i64, prev_close: f64) -> WireSnapshot {
        WireSnapshot {
            ticker: ticker.to_string(),
            name: None,
            price,
            volume,
            prev_close,
            high: price * 1.1,
            low: price * 0.9,
            vwap: Some(price),
            updated_ms: 1_750_000_000_000,
        }
    }

    #[test]
    fn sanitize_derives_change_pct() {
        let (rows, dropped) = sanitize_snapshots(vec![wire("VIGL", 3.2, 9_400_000, 2.5)], Utc::now());
        assert_eq!(dropped, 0);
        assert_eq!(rows.len(), 1);
        assert!((rows[0].change_pct - 28.0).abs() < 1e-9);
    }

    #[test]
    fn sanitize_zero_prev_close_means_zero_change() {
        let (rows, _) = sanitize_snapshots(vec![wire("NEWCO", 5.0, 100_000, 0.0)], Utc::now());
        assert_eq!(rows[0].change_pct, 0.0);
    }

    #[test]
    fn sanitize_drops_invalid_rows() {
        let raw = vec![
            wire("OK", 5.0, 100_000, 4.0),
            wire("ZERO", 0.0, 100_000, 4.0),  // zero price
            wire("NEGV", 5.0, -1, 4.0),       // negative volume
            wire("bad.tk", 5.0, 100_000, 4.0), // malformed ticker
        ];
        let (rows, dropped) = sanitize_snapshots(raw, Utc::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "OK");
        assert_eq!(dropped, 3);
    }

    #[test]
    fn sanitize_backfills_missing_range_with_price() {
        let mut w = wire("FLAT", 5.0, 100_000, 4.0);
        w.high = 0.0;
        w.low = 0.0;
        w.vwap = Some(0.0);
        let (rows, _) = sanitize_snapshots(vec![w], Utc::now());
        assert_eq!(rows[0].high, 5.0);
        assert_eq!(rows[0].low, 5.0);
        assert_eq!(rows[0].vwap, None);
    }
}
