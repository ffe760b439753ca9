// =============================================================================
// Volume cache — persistent 20-day average-volume store
// =============================================================================
//
// The cache is the reason the hot path never fetches per-symbol history: the
// refresh job writes trailing averages offline, and each scan reads them back
// in one pass. sqlite (WAL mode) is authoritative and survives restarts; the
// per-scan `warm()` snapshot layers an in-memory map on top so stage reads
// take no sqlite locks.
//
// Integrity rules enforced at this boundary:
//   - avg_20d must be > 0 on write (ErrInvalidVolume otherwise).
//   - reads exclude rows older than the freshness window.
//   - a miss is a miss: absent symbols are absent from the result map,
//     never filled with a default.
// =============================================================================

pub mod refresh;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One trailing-average row. Exclusively owned by the cache; the refresh job
/// creates them, the hot path reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAverage {
    pub symbol: String,
    pub avg_20d: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_30d: Option<i64>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid volume average for {symbol}: avg_20d must be > 0")]
    InvalidVolume { symbol: String },
    #[error("cache storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS volume_averages (
    symbol        TEXT PRIMARY KEY,
    avg_20d       INTEGER NOT NULL CHECK (avg_20d > 0),
    avg_30d       INTEGER,
    last_updated  INTEGER NOT NULL,
    created_at    INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_volume_averages_last_updated
    ON volume_averages(last_updated);
"#;

/// Persistent volume-average store. Many readers (scan loop, API), one writer
/// (refresh job); all access serialises through one connection.
pub struct VolumeCache {
    conn: Mutex<Connection>,
    freshness: Duration,
}

impl VolumeCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: impl AsRef<Path>, freshness_hours: i64) -> Result<Self, CacheError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!(path = %path.as_ref().display(), "volume cache opened");
        Ok(Self {
            conn: Mutex::new(conn),
            freshness: Duration::hours(freshness_hours),
        })
    }

    /// In-memory cache for tests.
    pub fn open_in_memory(freshness_hours: i64) -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            freshness: Duration::hours(freshness_hours),
        })
    }

    fn freshness_cutoff(&self, now: DateTime<Utc>) -> i64 {
        (now - self.freshness).timestamp()
    }

    /// Fetch averages for `symbols`, excluding stale rows. Missing symbols are
    /// simply absent from the map.
    pub fn batch_get(
        &self,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, VolumeAverage>, CacheError> {
        let wanted: HashSet<&str> = symbols.iter().map(|s| s.as_str()).collect();
        let mut out = self.load_fresh(now)?;
        out.retain(|symbol, _| wanted.contains(symbol.as_str()));
        Ok(out)
    }

    /// Load every fresh row into memory. Called once per scan, concurrently
    /// with the bulk snapshot fetch, so stage-5 lookups are pure map reads.
    pub fn warm(&self, now: DateTime<Utc>) -> Result<HashMap<String, VolumeAverage>, CacheError> {
        let map = self.load_fresh(now)?;
        debug!(rows = map.len(), "volume cache warmed");
        Ok(map)
    }

    fn load_fresh(&self, now: DateTime<Utc>) -> Result<HashMap<String, VolumeAverage>, CacheError> {
        let cutoff = self.freshness_cutoff(now);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, avg_20d, avg_30d, last_updated
             FROM volume_averages
             WHERE last_updated >= ?1",
        )?;

        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(VolumeAverage {
                symbol: row.get(0)?,
                avg_20d: row.get(1)?,
                avg_30d: row.get(2)?,
                last_updated: DateTime::<Utc>::from_timestamp(row.get::<_, i64>(3)?, 0)
                    .unwrap_or_default(),
            })
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let avg = row?;
            out.insert(avg.symbol.clone(), avg);
        }
        Ok(out)
    }

    /// Atomic per-record replace. Rows with `avg_20d <= 0` are rejected before
    /// any write happens.
    pub fn upsert(&self, records: &[VolumeAverage]) -> Result<usize, CacheError> {
        for record in records {
            if record.avg_20d <= 0 {
                return Err(CacheError::InvalidVolume {
                    symbol: record.symbol.clone(),
                });
            }
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO volume_averages (symbol, avg_20d, avg_30d, last_updated, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(symbol) DO UPDATE SET
                     avg_20d = excluded.avg_20d,
                     avg_30d = excluded.avg_30d,
                     last_updated = excluded.last_updated",
            )?;
            for record in records {
                stmt.execute(params![
                    record.symbol,
                    record.avg_20d,
                    record.avg_30d,
                    record.last_updated.timestamp(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Symbols whose `last_updated` has fallen behind `window`.
    pub fn stale_symbols(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<String>, CacheError> {
        let cutoff = (now - window).timestamp();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol FROM volume_averages WHERE last_updated < ?1 ORDER BY symbol",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Total row count, for health reporting.
    pub fn row_count(&self) -> Result<u64, CacheError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM volume_averages", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Cheap connectivity probe for the health endpoint.
    pub fn ping(&self) -> bool {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)).is_ok()
    }
}
