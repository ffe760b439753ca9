// =============================================================================
// Engine Settings — environment-driven startup configuration
// =============================================================================
//
// Everything the process needs before the first scan lives here, read once at
// startup (after dotenv) and again on an explicit reload. Hot calibration
// changes do NOT flow through Settings; they go through the CalibrationStore
// so that a running scan binds to one consistent snapshot.
// =============================================================================

use serde::Serialize;

/// Parameters for one token bucket (see `market_data::rate_limit`).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BucketParams {
    /// Maximum burst size.
    pub capacity: f64,
    /// Tokens restored per second.
    pub refill_per_sec: f64,
}

/// Full engine settings resolved from the environment.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Default strategy driven by the scan loop.
    pub strategy: String,
    /// API bind address.
    pub bind_addr: String,

    // --- Upstream provider ---------------------------------------------------
    pub provider_base_url: String,
    #[serde(skip_serializing)]
    pub provider_api_key: String,
    /// Bucket for the bulk snapshot endpoint class.
    pub snapshot_bucket: BucketParams,
    /// Separate bucket for the historical-bars endpoint class, so the refresh
    /// job can never starve the hot path.
    pub history_bucket: BucketParams,

    // --- Stores --------------------------------------------------------------
    pub cache_db_path: String,
    pub calibration_path: String,

    // --- Admin surface -------------------------------------------------------
    /// Bearer token required by calibration mutators. Empty means every
    /// mutation is rejected.
    #[serde(skip_serializing)]
    pub admin_token: String,

    // --- Pipeline tuning -----------------------------------------------------
    pub max_data_age_seconds: u64,
    pub scan_budget_seconds: u64,
    pub momentum_top_k: usize,
    pub min_rvol_default: f64,
    pub scan_interval_seconds: u64,
    /// Survivor count above which stage-6 scoring shards across threads.
    pub scoring_shard_threshold: usize,
    /// Maximum candidates per published artifact.
    pub max_candidates: usize,
    /// Artifact TTL in the publish store.
    pub artifact_ttl_seconds: u64,
    /// Volume-average freshness window, in hours.
    pub cache_freshness_hours: i64,

    // --- Refresh job ---------------------------------------------------------
    pub refresh_hour_utc: u32,
    pub refresh_batch_size: usize,

    // --- Session clock -------------------------------------------------------
    pub et_utc_offset_hours: i64,

    // --- Outbound events -----------------------------------------------------
    pub event_sink_url: Option<String>,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            strategy: env_str("NOVA_STRATEGY", "hybrid_v1"),
            bind_addr: env_str("NOVA_BIND_ADDR", "0.0.0.0:3001"),

            provider_base_url: env_str("NOVA_PROVIDER_BASE_URL", "https://api.marketdata.local"),
            provider_api_key: env_str("NOVA_PROVIDER_API_KEY", ""),
            snapshot_bucket: BucketParams {
                capacity: env_parse("NOVA_SNAPSHOT_BUCKET_CAPACITY", 5.0),
                refill_per_sec: env_parse("NOVA_SNAPSHOT_BUCKET_REFILL", 0.2),
            },
            history_bucket: BucketParams {
                capacity: env_parse("NOVA_HISTORY_BUCKET_CAPACITY", 20.0),
                refill_per_sec: env_parse("NOVA_HISTORY_BUCKET_REFILL", 4.0),
            },

            cache_db_path: env_str("NOVA_CACHE_DB_PATH", "volume_cache.db"),
            calibration_path: env_str("NOVA_CALIBRATION_PATH", "calibration.json"),

            admin_token: env_str("NOVA_ADMIN_TOKEN", ""),

            max_data_age_seconds: env_parse("MAX_DATA_AGE_SECONDS", 300),
            scan_budget_seconds: env_parse("SCAN_BUDGET_SECONDS", 15),
            momentum_top_k: env_parse("MOMENTUM_TOPK", 1000),
            min_rvol_default: env_parse("MIN_RVOL_DEFAULT", 1.5),
            scan_interval_seconds: env_parse("NOVA_SCAN_INTERVAL_SECONDS", 60),
            scoring_shard_threshold: env_parse("NOVA_SCORING_SHARD_THRESHOLD", 2000),
            max_candidates: env_parse("NOVA_MAX_CANDIDATES", 50),
            artifact_ttl_seconds: env_parse("NOVA_ARTIFACT_TTL_SECONDS", 600),
            cache_freshness_hours: env_parse("NOVA_CACHE_FRESHNESS_HOURS", 48),

            refresh_hour_utc: env_parse("NOVA_REFRESH_HOUR_UTC", 21),
            refresh_batch_size: env_parse("NOVA_REFRESH_BATCH_SIZE", 100),

            et_utc_offset_hours: env_parse("NOVA_ET_UTC_OFFSET_HOURS", -4),

            event_sink_url: std::env::var("NOVA_EVENT_SINK_URL").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Hard wall-clock budget for a scan: twice the soft budget.
    pub fn hard_budget_seconds(&self) -> u64 {
        self.scan_budget_seconds * 2
    }
}
