//! Composite scoring and global calibration.
//!
//! `r_raw` is the fixed-weight sum of the five component scores. It is
//! comparable only within one full-population run: calibration ranks the
//! ENTIRE population's r_raw values and rescales rank to [0, 100]. A
//! batch's local values are order-preserving inputs to that one global
//! rank — they are never normalized per batch.

use crate::config::{ComponentWeights, LabelThresholds};
use crate::model::{RiskLabel, ScoreComponents};
use crate::stats;

/// Weighted raw composite of one provider's components.
pub fn composite_raw(c: &ScoreComponents, w: &ComponentWeights) -> f64 {
    c.billing_outlier_score * w.billing_outlier
        + c.ownership_chain_risk * w.ownership_chain
        + c.payment_trajectory_score * w.payment_trajectory
        + c.exclusion_proximity_score * w.exclusion_proximity
        + c.program_concentration_score * w.program_concentration
}

/// Global percentile calibration over the whole population's r_raw
/// column. For n > 1: rank ascending (ties broken by input order) and
/// rescale rank/(n-1) to [0, 100]. For n == 1 the single score is scaled
/// against max(r_raw, 1). Rounded to 2 decimals.
pub fn calibrate(r_raw: &[f64]) -> Vec<f64> {
    let n = r_raw.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![stats::round2(r_raw[0] / r_raw[0].max(1.0) * 100.0)];
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        r_raw[a]
            .partial_cmp(&r_raw[b])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut calibrated = vec![0.0; n];
    let denom = (n - 1) as f64;
    for (rank, &idx) in order.iter().enumerate() {
        calibrated[idx] = stats::round2(rank as f64 / denom * 100.0);
    }
    calibrated
}

/// Label for one calibrated score.
pub fn risk_label(score: f64, thresholds: &LabelThresholds) -> RiskLabel {
    RiskLabel::from_score(score, thresholds)
}
