// =============================================================================
// Calibration store — versioned weights/thresholds with emergency override
// =============================================================================
//
// Scoring calibration is copy-on-write: readers take an immutable
// `ResolvedProfile` snapshot at scan start (an `Arc` clone, no locks held
// across the scan) and writers swap whole profiles under a short write lock.
// Every observable transition bumps a monotonically increasing store version.
//
// An emergency override shadows the requested strategy for a capped TTL
// (15 minutes max) and expires on its own; expiry is a normal transition, not
// an error.
//
// Persistence uses the atomic tmp + rename pattern so a crash mid-write can
// never corrupt the document. Every field carries a serde default so older
// documents keep loading as fields are added.
// =============================================================================

pub mod presets;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::types::Session;

use presets::{default_preset_for, known_strategies, preset};

/// Maximum TTL an emergency override may carry; longer requests are clamped.
pub const MAX_OVERRIDE_TTL: Duration = Duration::minutes(15);

// =============================================================================
// Profile types
// =============================================================================

/// Subscore weights. Must sum to 1 within 1e-6 after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub volume_momentum: f64,
    pub squeeze: f64,
    pub catalyst: f64,
    pub options: f64,
    pub technical: f64,
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.volume_momentum + self.squeeze + self.catalyst + self.options + self.technical
    }

    fn any_negative(&self) -> bool {
        [
            self.volume_momentum,
            self.squeeze,
            self.catalyst,
            self.options,
            self.technical,
        ]
        .iter()
        .any(|w| *w < 0.0)
    }

    fn normalized(&self) -> Option<Self> {
        let sum = self.sum();
        if sum <= 0.0 {
            return None;
        }
        Some(Self {
            volume_momentum: self.volume_momentum / sum,
            squeeze: self.squeeze / sum,
            catalyst: self.catalyst / sum,
            options: self.options / sum,
            technical: self.technical / sum,
        })
    }

    /// Canonical hash of the resolved weight map: sorted `key=value` pairs at
    /// six decimal places, SHA-256, hex. Attached to every candidate so weight
    /// drift between scan and read is detectable.
    pub fn canonical_hash(&self) -> String {
        let canonical = format!(
            "catalyst={:.6},options={:.6},squeeze={:.6},technical={:.6},volume_momentum={:.6}",
            self.catalyst, self.options, self.squeeze, self.technical, self.volume_momentum
        );
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }
}

/// Gatekeeping thresholds. Ratio fields (`min_relvol_30`, `min_rvol`) may
/// exceed 1; fraction fields must stay in [0, 1] and are validated on patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_relvol_30: f64,
    pub min_atr_pct: f64,
    pub require_vwap_reclaim: bool,
    pub vwap_proximity_pct: f64,
    pub min_rvol: f64,
    pub small_float_max_m: f64,
    pub large_float_min_m: f64,
    pub mid_float_path_enabled: bool,
    pub max_soft_pass: u32,
    pub soft_pass_tolerance: f64,
    pub catalyst_soft_pass_min: f64,
    pub soft_pass_penalty: f64,
}

/// Score cutoffs for action tagging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryRules {
    pub trade_ready_min: f64,
    pub watchlist_min: f64,
}

/// Per-session threshold relaxations merged onto the base before gating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_relvol_30: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_atr_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rvol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_vwap_reclaim: Option<bool>,
}

/// One strategy's full calibration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub version: u64,
    pub strategy: String,
    pub active_preset: String,
    pub weights: Weights,
    pub thresholds: Thresholds,
    pub entry_rules: EntryRules,
    #[serde(default)]
    pub session_overrides: HashMap<Session, SessionOverride>,
}

impl CalibrationProfile {
    fn from_preset(strategy: &str, p: presets::Preset, version: u64) -> Self {
        Self {
            version,
            strategy: strategy.to_string(),
            active_preset: p.name.to_string(),
            weights: p.weights,
            thresholds: p.thresholds,
            entry_rules: p.entry_rules,
            session_overrides: p.session_overrides,
        }
    }
}

/// TTL-bounded forced strategy used for rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyOverride {
    pub forced_strategy: String,
    pub expires_at: DateTime<Utc>,
}

/// Immutable snapshot handed to a scan: the profile that actually applies
/// after any unexpired override, plus the hash of its weights.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub profile: Arc<CalibrationProfile>,
    pub weights_hash: String,
    /// True when an emergency override redirected the requested strategy.
    pub forced: bool,
    pub store_version: u64,
}

impl ResolvedProfile {
    /// Base thresholds with the session override merged in.
    pub fn thresholds_for(&self, session: Session) -> Thresholds {
        let mut t = self.profile.thresholds;
        if let Some(o) = self.profile.session_overrides.get(&session) {
            if let Some(v) = o.min_relvol_30 {
                t.min_relvol_30 = v;
            }
            if let Some(v) = o.min_atr_pct {
                t.min_atr_pct = v;
            }
            if let Some(v) = o.min_rvol {
                t.min_rvol = v;
            }
            if let Some(v) = o.require_vwap_reclaim {
                t.require_vwap_reclaim = v;
            }
        }
        t
    }
}

// =============================================================================
// Patch types
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeightsPatch {
    pub volume_momentum: Option<f64>,
    pub squeeze: Option<f64>,
    pub catalyst: Option<f64>,
    pub options: Option<f64>,
    pub technical: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdsPatch {
    pub min_relvol_30: Option<f64>,
    pub min_atr_pct: Option<f64>,
    pub require_vwap_reclaim: Option<bool>,
    pub vwap_proximity_pct: Option<f64>,
    pub min_rvol: Option<f64>,
    pub small_float_max_m: Option<f64>,
    pub large_float_min_m: Option<f64>,
    pub mid_float_path_enabled: Option<bool>,
    pub max_soft_pass: Option<u32>,
    pub soft_pass_tolerance: Option<f64>,
    pub catalyst_soft_pass_min: Option<f64>,
    pub soft_pass_penalty: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryRulesPatch {
    pub trade_ready_min: Option<f64>,
    pub watchlist_min: Option<f64>,
}

/// Partial update merged into a profile by `patch`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalibrationPatch {
    pub weights: Option<WeightsPatch>,
    pub thresholds: Option<ThresholdsPatch>,
    pub entry_rules: Option<EntryRulesPatch>,
    pub session_overrides: Option<HashMap<Session, SessionOverride>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("weights must be non-negative")]
    NegativeWeight,
    #[error("weights sum to zero, cannot normalize")]
    ZeroWeightSum,
    #[error("{field} = {value} looks like a legacy percentage; thresholds are fractions in [0, 1]")]
    LegacyPercentage { field: &'static str, value: f64 },
    #[error("unknown preset: {0}")]
    UnknownPreset(String),
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

// =============================================================================
// Store
// =============================================================================

#[derive(Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    version: u64,
    #[serde(default)]
    profiles: HashMap<String, CalibrationProfile>,
    #[serde(default)]
    emergency_override: Option<EmergencyOverride>,
}

struct StoreState {
    profiles: HashMap<String, Arc<CalibrationProfile>>,
    emergency_override: Option<EmergencyOverride>,
    version: u64,
}

/// Holds the active calibration for every known strategy.
pub struct CalibrationStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl CalibrationStore {
    /// Build the store, loading a persisted document from `path` when one
    /// exists and falling back to pinned preset defaults otherwise.
    pub fn new(path: Option<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let loaded = path.as_deref().and_then(|p| match Self::load(p) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "failed to load calibration document, using defaults");
                None
            }
        });

        let state = loaded.unwrap_or_else(|| StoreState {
            profiles: Self::default_profiles(),
            emergency_override: None,
            version: 1,
        });

        Self {
            state: RwLock::new(state),
            path,
            clock,
        }
    }

    fn default_profiles() -> HashMap<String, Arc<CalibrationProfile>> {
        known_strategies()
            .into_iter()
            .map(|s| {
                let p = default_preset_for(s).expect("known strategy has a default preset");
                (s.to_string(), Arc::new(CalibrationProfile::from_preset(s, p, 1)))
            })
            .collect()
    }

    fn load(path: &Path) -> Result<StoreState> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration from {}", path.display()))?;
        let doc: PersistedState = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse calibration from {}", path.display()))?;

        let mut profiles: HashMap<String, Arc<CalibrationProfile>> = doc
            .profiles
            .into_iter()
            .map(|(k, v)| (k, Arc::new(v)))
            .collect();
        // Strategies added since the document was written get defaults.
        for (k, v) in Self::default_profiles() {
            profiles.entry(k).or_insert(v);
        }

        info!(path = %path.display(), profiles = profiles.len(), "calibration document loaded");
        Ok(StoreState {
            profiles,
            emergency_override: doc.emergency_override,
            version: doc.version.max(1),
        })
    }

    fn persist(&self, state: &StoreState) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let doc = PersistedState {
            version: state.version,
            profiles: state
                .profiles
                .iter()
                .map(|(k, v)| (k.clone(), (**v).clone()))
                .collect(),
            emergency_override: state.emergency_override.clone(),
        };
        if let Err(e) = Self::save(path, &doc) {
            warn!(error = %e, "failed to persist calibration document");
        }
    }

    fn save(path: &Path, doc: &PersistedState) -> Result<()> {
        let content =
            serde_json::to_string_pretty(doc).context("failed to serialise calibration")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp calibration to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp calibration to {}", path.display()))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Read side
    // -------------------------------------------------------------------------

    /// Resolve the profile that applies to `strategy` right now, with any
    /// unexpired emergency override shadowing the request.
    pub fn resolve(&self, strategy: &str) -> Result<ResolvedProfile, CalibrationError> {
        let now = self.clock.now();

        // Lazily retire an expired override (normal transition, bumps version).
        {
            let expired = {
                let state = self.state.read();
                matches!(&state.emergency_override, Some(o) if o.expires_at <= now)
            };
            if expired {
                let mut state = self.state.write();
                if matches!(&state.emergency_override, Some(o) if o.expires_at <= now) {
                    info!("emergency override expired, reverting to base strategy");
                    state.emergency_override = None;
                    state.version += 1;
                    self.persist(&state);
                }
            }
        }

        let state = self.state.read();
        let (effective, forced) = match &state.emergency_override {
            Some(o) if o.expires_at > now => (o.forced_strategy.clone(), true),
            _ => (strategy.to_string(), false),
        };

        let profile = state
            .profiles
            .get(&effective)
            .cloned()
            .ok_or_else(|| CalibrationError::UnknownStrategy(effective.clone()))?;

        Ok(ResolvedProfile {
            weights_hash: profile.weights.canonical_hash(),
            forced,
            store_version: state.version,
            profile,
        })
    }

    /// Resolve a strategy's own profile, ignoring any emergency override.
    /// Used by side-by-side strategy validation, where shadowing every
    /// strategy with the forced one would make the comparison meaningless.
    pub fn resolve_base(&self, strategy: &str) -> Result<ResolvedProfile, CalibrationError> {
        let state = self.state.read();
        let profile = state
            .profiles
            .get(strategy)
            .cloned()
            .ok_or_else(|| CalibrationError::UnknownStrategy(strategy.to_string()))?;
        Ok(ResolvedProfile {
            weights_hash: profile.weights.canonical_hash(),
            forced: false,
            store_version: state.version,
            profile,
        })
    }

    /// Current store version (bumped on every observable transition).
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn active_override(&self) -> Option<EmergencyOverride> {
        let now = self.clock.now();
        self.state
            .read()
            .emergency_override
            .clone()
            .filter(|o| o.expires_at > now)
    }

    // -------------------------------------------------------------------------
    // Write side
    // -------------------------------------------------------------------------

    /// Merge a partial update into `strategy`'s profile. Weights re-normalize
    /// when a weights patch leaves them off-sum; negative weights and
    /// percentage-styled fractions are rejected with the profile untouched.
    pub fn patch(
        &self,
        strategy: &str,
        patch: &CalibrationPatch,
    ) -> Result<ResolvedProfile, CalibrationError> {
        let mut state = self.state.write();
        let current = state
            .profiles
            .get(strategy)
            .ok_or_else(|| CalibrationError::UnknownStrategy(strategy.to_string()))?;

        let mut next = (**current).clone();

        if let Some(wp) = &patch.weights {
            let mut w = next.weights;
            if let Some(v) = wp.volume_momentum {
                w.volume_momentum = v;
            }
            if let Some(v) = wp.squeeze {
                w.squeeze = v;
            }
            if let Some(v) = wp.catalyst {
                w.catalyst = v;
            }
            if let Some(v) = wp.options {
                w.options = v;
            }
            if let Some(v) = wp.technical {
                w.technical = v;
            }
            if w.any_negative() {
                return Err(CalibrationError::NegativeWeight);
            }
            next.weights = if (w.sum() - 1.0).abs() > 1e-6 {
                w.normalized().ok_or(CalibrationError::ZeroWeightSum)?
            } else {
                w
            };
        }

        if let Some(tp) = &patch.thresholds {
            check_fraction("min_atr_pct", tp.min_atr_pct)?;
            check_fraction("vwap_proximity_pct", tp.vwap_proximity_pct)?;
            check_fraction("soft_pass_tolerance", tp.soft_pass_tolerance)?;
            check_fraction("catalyst_soft_pass_min", tp.catalyst_soft_pass_min)?;
            check_fraction("soft_pass_penalty", tp.soft_pass_penalty)?;

            let t = &mut next.thresholds;
            if let Some(v) = tp.min_relvol_30 {
                t.min_relvol_30 = v;
            }
            if let Some(v) = tp.min_atr_pct {
                t.min_atr_pct = v;
            }
            if let Some(v) = tp.require_vwap_reclaim {
                t.require_vwap_reclaim = v;
            }
            if let Some(v) = tp.vwap_proximity_pct {
                t.vwap_proximity_pct = v;
            }
            if let Some(v) = tp.min_rvol {
                t.min_rvol = v;
            }
            if let Some(v) = tp.small_float_max_m {
                t.small_float_max_m = v;
            }
            if let Some(v) = tp.large_float_min_m {
                t.large_float_min_m = v;
            }
            if let Some(v) = tp.mid_float_path_enabled {
                t.mid_float_path_enabled = v;
            }
            if let Some(v) = tp.max_soft_pass {
                t.max_soft_pass = v;
            }
            if let Some(v) = tp.soft_pass_tolerance {
                t.soft_pass_tolerance = v;
            }
            if let Some(v) = tp.catalyst_soft_pass_min {
                t.catalyst_soft_pass_min = v;
            }
            if let Some(v) = tp.soft_pass_penalty {
                t.soft_pass_penalty = v;
            }
        }

        if let Some(ep) = &patch.entry_rules {
            check_fraction("trade_ready_min", ep.trade_ready_min)?;
            check_fraction("watchlist_min", ep.watchlist_min)?;
            if let Some(v) = ep.trade_ready_min {
                next.entry_rules.trade_ready_min = v;
            }
            if let Some(v) = ep.watchlist_min {
                next.entry_rules.watchlist_min = v;
            }
        }

        if let Some(so) = &patch.session_overrides {
            for (session, o) in so {
                next.session_overrides.insert(*session, *o);
            }
        }

        next.version += 1;
        state.version += 1;
        let strategy_key = strategy.to_string();
        state.profiles.insert(strategy_key.clone(), Arc::new(next));
        self.persist(&state);

        let profile = state.profiles[&strategy_key].clone();
        info!(strategy = %strategy_key, version = profile.version, "calibration patched");
        Ok(ResolvedProfile {
            weights_hash: profile.weights.canonical_hash(),
            forced: false,
            store_version: state.version,
            profile,
        })
    }

    /// Swap in a named preset wholesale.
    pub fn set_preset(
        &self,
        strategy: &str,
        name: &str,
    ) -> Result<ResolvedProfile, CalibrationError> {
        let p = preset(name).ok_or_else(|| CalibrationError::UnknownPreset(name.to_string()))?;

        let mut state = self.state.write();
        let current = state
            .profiles
            .get(strategy)
            .ok_or_else(|| CalibrationError::UnknownStrategy(strategy.to_string()))?;

        let version = current.version + 1;
        let mut next = CalibrationProfile::from_preset(strategy, p, version);
        next.strategy = strategy.to_string();

        state.version += 1;
        state.profiles.insert(strategy.to_string(), Arc::new(next));
        self.persist(&state);

        let profile = state.profiles[strategy].clone();
        info!(strategy, preset = name, "preset swapped");
        Ok(ResolvedProfile {
            weights_hash: profile.weights.canonical_hash(),
            forced: false,
            store_version: state.version,
            profile,
        })
    }

    /// Restore the pinned defaults for `strategy`.
    pub fn reset(&self, strategy: &str) -> Result<ResolvedProfile, CalibrationError> {
        let p = default_preset_for(strategy)
            .ok_or_else(|| CalibrationError::UnknownStrategy(strategy.to_string()))?;

        let mut state = self.state.write();
        let version = state
            .profiles
            .get(strategy)
            .map(|c| c.version + 1)
            .unwrap_or(1);
        state.version += 1;
        state.profiles.insert(
            strategy.to_string(),
            Arc::new(CalibrationProfile::from_preset(strategy, p, version)),
        );
        self.persist(&state);

        let profile = state.profiles[strategy].clone();
        info!(strategy, "calibration reset to defaults");
        Ok(ResolvedProfile {
            weights_hash: profile.weights.canonical_hash(),
            forced: false,
            store_version: state.version,
            profile,
        })
    }

    /// Install an emergency override forcing every resolution to `strategy`
    /// until the (capped) TTL expires.
    pub fn force_strategy(
        &self,
        strategy: &str,
        ttl: Duration,
    ) -> Result<EmergencyOverride, CalibrationError> {
        if !self.state.read().profiles.contains_key(strategy) {
            return Err(CalibrationError::UnknownStrategy(strategy.to_string()));
        }

        let ttl = if ttl > MAX_OVERRIDE_TTL || ttl <= Duration::zero() {
            MAX_OVERRIDE_TTL
        } else {
            ttl
        };
        let override_ = EmergencyOverride {
            forced_strategy: strategy.to_string(),
            expires_at: self.clock.now() + ttl,
        };

        let mut state = self.state.write();
        state.emergency_override = Some(override_.clone());
        state.version += 1;
        self.persist(&state);

        warn!(
            forced = strategy,
            expires_at = %override_.expires_at,
            "emergency strategy override installed"
        );
        Ok(override_)
    }
}

fn check_fraction(field: &'static str, value: Option<f64>) -> Result<(), CalibrationError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(CalibrationError::LegacyPercentage { field, value: v }),
        _ => Ok(()),
    }
}
