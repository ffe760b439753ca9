// =============================================================================
// Named calibration presets
// =============================================================================
//
// A preset is a complete bundle of weights, thresholds, and entry rules that
// can be swapped in without editing individual fields. Strategies share the
// scoring engine and differ only in their default preset: `hybrid_v1` starts
// from `balanced_default`, `legacy_v0` from the volume-heavy `legacy_momentum`.
// =============================================================================

use std::collections::HashMap;

use crate::calibration::{EntryRules, SessionOverride, Thresholds, Weights};
use crate::types::Session;

pub const PRESET_BALANCED: &str = "balanced_default";
pub const PRESET_SQUEEZE: &str = "squeeze_aggressive";
pub const PRESET_CATALYST: &str = "catalyst_heavy";
pub const PRESET_LEGACY: &str = "legacy_momentum";

pub const STRATEGY_HYBRID_V1: &str = "hybrid_v1";
pub const STRATEGY_LEGACY_V0: &str = "legacy_v0";

/// All strategies the engine knows how to run.
pub fn known_strategies() -> Vec<&'static str> {
    vec![STRATEGY_HYBRID_V1, STRATEGY_LEGACY_V0]
}

/// One preset bundle.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: &'static str,
    pub weights: Weights,
    pub thresholds: Thresholds,
    pub entry_rules: EntryRules,
    pub session_overrides: HashMap<Session, SessionOverride>,
}

fn base_thresholds() -> Thresholds {
    Thresholds {
        min_relvol_30: 2.5,
        min_atr_pct: 0.04,
        require_vwap_reclaim: true,
        vwap_proximity_pct: 0.005,
        min_rvol: 1.5,
        small_float_max_m: 75.0,
        large_float_min_m: 150.0,
        mid_float_path_enabled: true,
        max_soft_pass: 0,
        soft_pass_tolerance: 0.10,
        catalyst_soft_pass_min: 0.7,
        soft_pass_penalty: 0.05,
    }
}

fn base_session_overrides() -> HashMap<Session, SessionOverride> {
    let mut overrides = HashMap::new();
    // Thin-tape sessions run against relaxed relative-volume floors.
    overrides.insert(
        Session::Premarket,
        SessionOverride {
            min_relvol_30: Some(2.0),
            ..SessionOverride::default()
        },
    );
    overrides.insert(
        Session::Afterhours,
        SessionOverride {
            min_relvol_30: Some(2.0),
            ..SessionOverride::default()
        },
    );
    overrides
}

/// Look up a preset by name.
pub fn preset(name: &str) -> Option<Preset> {
    match name {
        PRESET_BALANCED => Some(Preset {
            name: PRESET_BALANCED,
            weights: Weights {
                volume_momentum: 0.35,
                squeeze: 0.25,
                catalyst: 0.20,
                options: 0.10,
                technical: 0.10,
            },
            thresholds: base_thresholds(),
            entry_rules: EntryRules {
                trade_ready_min: 0.75,
                watchlist_min: 0.70,
            },
            session_overrides: base_session_overrides(),
        }),
        PRESET_SQUEEZE => Some(Preset {
            name: PRESET_SQUEEZE,
            weights: Weights {
                volume_momentum: 0.25,
                squeeze: 0.40,
                catalyst: 0.15,
                options: 0.10,
                technical: 0.10,
            },
            thresholds: Thresholds {
                min_relvol_30: 2.0,
                ..base_thresholds()
            },
            entry_rules: EntryRules {
                trade_ready_min: 0.75,
                watchlist_min: 0.70,
            },
            session_overrides: base_session_overrides(),
        }),
        PRESET_CATALYST => Some(Preset {
            name: PRESET_CATALYST,
            weights: Weights {
                volume_momentum: 0.25,
                squeeze: 0.15,
                catalyst: 0.40,
                options: 0.10,
                technical: 0.10,
            },
            thresholds: base_thresholds(),
            entry_rules: EntryRules {
                trade_ready_min: 0.75,
                watchlist_min: 0.70,
            },
            session_overrides: base_session_overrides(),
        }),
        PRESET_LEGACY => Some(Preset {
            name: PRESET_LEGACY,
            weights: Weights {
                volume_momentum: 0.50,
                squeeze: 0.10,
                catalyst: 0.15,
                options: 0.05,
                technical: 0.20,
            },
            thresholds: Thresholds {
                min_relvol_30: 2.0,
                min_atr_pct: 0.03,
                ..base_thresholds()
            },
            entry_rules: EntryRules {
                trade_ready_min: 0.70,
                watchlist_min: 0.65,
            },
            session_overrides: base_session_overrides(),
        }),
        _ => None,
    }
}

/// Default preset for a strategy.
pub fn default_preset_for(strategy: &str) -> Option<Preset> {
    match strategy {
        STRATEGY_HYBRID_V1 => preset(PRESET_BALANCED),
        STRATEGY_LEGACY_V0 => preset(PRESET_LEGACY),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_has_unit_weight_sum() {
        for name in [PRESET_BALANCED, PRESET_SQUEEZE, PRESET_CATALYST, PRESET_LEGACY] {
            let p = preset(name).unwrap();
            assert!(
                (p.weights.sum() - 1.0).abs() <= 1e-6,
                "{name} weights sum to {}",
                p.weights.sum()
            );
        }
    }

    #[test]
    fn every_strategy_resolves_a_default_preset() {
        for strategy in known_strategies() {
            assert!(default_preset_for(strategy).is_some(), "{strategy}");
        }
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("yolo_mode").is_none());
    }

    #[test]
    fn legacy_preset_leans_on_volume() {
        let p = preset(PRESET_LEGACY).unwrap();
        assert!(p.weights.volume_momentum >= 0.5);
        assert!(p.entry_rules.trade_ready_min < 0.75);
    }
}
