// =============================================================================
// Candidate publisher — freshness-tagged artifact store
// =============================================================================
//
// Each completed scan serializes once into a `ScanArtifact` JSON payload and
// lands under two keys with the same TTL:
//
//   discovery:contenders:latest:<strategy>   (primary, strategy-scoped)
//   discovery:contenders:latest              (fallback)
//
// Writes are atomic per key and last-writer-wins. Readers judge freshness
// from the payload's `generated_at`, not from the TTL alone; the publisher
// enforces that `generated_at` is strictly increasing per strategy so a
// late-landing stale scan can never shadow a newer artifact.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::scoring::Candidate;

pub const FALLBACK_KEY: &str = "discovery:contenders:latest";

pub fn primary_key(strategy: &str) -> String {
    format!("{FALLBACK_KEY}:{strategy}")
}

/// Per-stage survivor counts for one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub universe: usize,
    pub dropped_rows: u64,
    pub universe_survivors: usize,
    pub momentum_survivors: usize,
    pub cache_hits: usize,
    pub rvol_survivors: usize,
    pub scored: usize,
    pub soft_pass_admitted: usize,
    pub published: usize,
    pub duration_ms: u64,
}

/// The immutable published result of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanArtifact {
    pub scan_id: String,
    pub generated_at: DateTime<Utc>,
    pub strategy: String,
    pub preset: String,
    pub weights_hash: String,
    pub candidates: Vec<Candidate>,
    pub stats: ScanStats,
    /// Key into the trace recorder for this run's stage telemetry.
    pub trace_ref: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("artifact generated_at {new} is not newer than last published {last}")]
    StaleGeneratedAt {
        new: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    #[error("failed to serialise artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

struct StoredEntry {
    payload: String,
    expires_at: Instant,
}

/// Keyed associative store with per-entry TTL. Values are opaque JSON
/// payloads; expiry is enforced lazily on read.
pub struct ArtifactStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, key: &str, payload: String, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            StoredEntry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Read a non-expired payload. Expired entries are dropped on the way.
    pub fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.payload.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Entry exists but expired: evict under the write lock.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.expires_at <= Instant::now()) {
            entries.remove(key);
        }
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.payload.clone())
    }

    pub fn contains_live(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes artifacts into the store under the primary and fallback keys.
pub struct CandidatePublisher {
    store: std::sync::Arc<ArtifactStore>,
    ttl: Duration,
    last_generated: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CandidatePublisher {
    pub fn new(store: std::sync::Arc<ArtifactStore>, ttl_seconds: u64) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(ttl_seconds),
            last_generated: Mutex::new(HashMap::new()),
        }
    }

    /// Publish one artifact atomically per key. On any failure before the
    /// first write, nothing is touched and the previous artifact stays
    /// authoritative.
    pub fn publish(&self, artifact: &ScanArtifact) -> Result<(), PublishError> {
        let payload = serde_json::to_string(artifact)?;

        {
            let mut last = self.last_generated.lock();
            if let Some(prev) = last.get(&artifact.strategy) {
                if artifact.generated_at <= *prev {
                    return Err(PublishError::StaleGeneratedAt {
                        new: artifact.generated_at,
                        last: *prev,
                    });
                }
            }
            last.insert(artifact.strategy.clone(), artifact.generated_at);
        }

        self.store
            .put(&primary_key(&artifact.strategy), payload.clone(), self.ttl);
        self.store.put(FALLBACK_KEY, payload, self.ttl);

        info!(
            scan_id = %artifact.scan_id,
            strategy = %artifact.strategy,
            candidates = artifact.candidates.len(),
            "artifact published"
        );
        Ok(())
    }

    /// Resolve the newest non-expired artifact, preferring the strategy key.
    pub fn read(&self, strategy: &str) -> Option<ScanArtifact> {
        let payload = self
            .store
            .get(&primary_key(strategy))
            .or_else(|| self.store.get(FALLBACK_KEY))?;
        match serde_json::from_str(&payload) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                debug!(error = %e, "stored artifact failed to parse");
                None
            }
        }
    }
}
