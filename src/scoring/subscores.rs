// =============================================================================
// Subscore computation — five normalized components
// =============================================================================
//
// Each subscore maps its Known inputs into [0, 1]. Missing inputs contribute
// exactly 0 to their term; the squeeze subscore additionally requires its
// core inputs (float class and short interest) to be present at all, and
// reports a `missing_input` flag when they are not.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::calibration::Weights;
use crate::scoring::inputs::{EmaCross, FactorSet, Input};
use crate::types::FloatClass;

/// The five normalized components of a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Subscores {
    pub volume_momentum: f64,
    pub squeeze: f64,
    pub catalyst: f64,
    pub options: f64,
    pub technical: f64,
}

impl Subscores {
    /// Weighted composite in [0, 1].
    pub fn composite(&self, weights: &Weights) -> f64 {
        weights.volume_momentum * self.volume_momentum
            + weights.squeeze * self.squeeze
            + weights.catalyst * self.catalyst
            + weights.options * self.options
            + weights.technical * self.technical
    }
}

/// Saturating normalisation: x scaled against `full`, clamped to [0, 1].
fn sat(x: f64, full: f64) -> f64 {
    (x / full).clamp(0.0, 1.0)
}

fn known_or_zero(input: &Input<f64>, weight: f64, full: f64) -> f64 {
    match input.get() {
        Some(v) => weight * sat(v, full),
        None => 0.0,
    }
}

/// Compute all five subscores. Returns the scores and any missing-input flags
/// raised along the way.
pub fn compute(factors: &FactorSet, float_class: FloatClass) -> (Subscores, Vec<&'static str>) {
    let mut flags = Vec::new();

    // ── volume_momentum ─────────────────────────────────────────────────
    let volume_momentum = known_or_zero(&factors.relvol_30, 0.40, 10.0)
        + known_or_zero(&factors.uptrend_days, 0.20, 5.0)
        + match factors.vwap_reclaimed.get_bool() {
            Some(true) => 0.20,
            _ => 0.0,
        }
        + known_or_zero(&factors.atr_pct, 0.20, 0.10);

    // ── squeeze ─────────────────────────────────────────────────────────
    let squeeze = match (float_class, factors.short_interest.get()) {
        (FloatClass::Unknown, _) | (_, None) => {
            flags.push("squeeze:missing_input");
            0.0
        }
        (class, Some(si)) => {
            let float_factor = match class {
                FloatClass::Small => 1.0,
                FloatClass::Mid => 0.6,
                FloatClass::Large => 0.3,
                FloatClass::Unknown => unreachable!("handled above"),
            };
            let pressure = 0.50 * sat(si, 0.40)
                + known_or_zero(&factors.borrow_fee, 0.25, 1.0)
                + known_or_zero(&factors.utilization, 0.25, 1.0);
            float_factor * pressure
        }
    };

    // ── catalyst ────────────────────────────────────────────────────────
    let catalyst = known_or_zero(&factors.news_score, 0.60, 1.0)
        + known_or_zero(&factors.social_rank, 0.40, 1.0);

    // ── options ─────────────────────────────────────────────────────────
    let options = match factors.call_put_ratio.get() {
        Some(cp) => 0.60 * sat((cp - 1.0).max(0.0), 2.0),
        None => 0.0,
    } + known_or_zero(&factors.iv_percentile, 0.40, 1.0);

    // ── technical ───────────────────────────────────────────────────────
    let technical: f64 = match factors.ema_cross.value() {
        Some(EmaCross::Bull) => 0.60,
        Some(EmaCross::Flat) => 0.30,
        Some(EmaCross::Bear) | None => 0.0,
    } + match factors.rsi.get() {
        // The momentum band: strong but not blow-off.
        Some(rsi) if (60.0..=75.0).contains(&rsi) => 0.40,
        Some(rsi) if (50.0..60.0).contains(&rsi) || (75.0..=80.0).contains(&rsi) => 0.20,
        _ => 0.0,
    };

    let scores = Subscores {
        volume_momentum: volume_momentum.clamp(0.0, 1.0),
        squeeze: squeeze.clamp(0.0, 1.0),
        catalyst: catalyst.clamp(0.0, 1.0),
        options: options.clamp(0.0, 1.0),
        technical: technical.clamp(0.0, 1.0),
    };
    (scores, flags)
}
