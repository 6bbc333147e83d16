//! Robust statistics primitives: median, MAD, capped z-scores, the
//! logistic score mapping, and average-tie percent ranks.
//!
//! These operate on plain f64 slices so peer-group reductions stay
//! columnar — callers group once and hand each group's column in.

/// Hard cap on robust z-scores.
pub const Z_CLIP: f64 = 5.0;

/// Floor applied to MAD before dividing. A peer group where every member
/// is identical saturates any deviation straight to ±Z_CLIP.
pub const MAD_FLOOR: f64 = 1e-9;

/// Median of a slice. Returns 0.0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Median and median-absolute-deviation in one pass over the group column.
pub fn median_and_mad(values: &[f64]) -> (f64, f64) {
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    (med, median(&deviations))
}

/// Robust z-score of `target` against precomputed group stats, capped to
/// [-Z_CLIP, Z_CLIP]. `mad_scale` is the MAD-to-sigma factor (1.4826).
pub fn robust_z_from_stats(target: f64, med: f64, mad: f64, mad_scale: f64) -> f64 {
    if mad < MAD_FLOOR {
        return ((target - med) / MAD_FLOOR).clamp(-Z_CLIP, Z_CLIP);
    }
    ((target - med) / (mad_scale * mad)).clamp(-Z_CLIP, Z_CLIP)
}

/// Robust z-score of `target` relative to `values`. Empty peers yield 0.
pub fn robust_zscore(values: &[f64], target: f64, mad_scale: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let (med, mad) = median_and_mad(values);
    robust_z_from_stats(target, med, mad, mad_scale)
}

/// Map a z-score to [0, 100] via the logistic transform 100 * sigma(z/2).
/// Strictly monotone; score(z) + score(-z) == 100.
pub fn map_to_score(z: f64) -> f64 {
    100.0 / (1.0 + (-z / 2.0).exp())
}

/// Average-tie 1-based ranks of `values` (ties share the mean of their
/// positions), matching SQL/dataframe RANK semantics used upstream.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Positions i..=j (0-based) share the average 1-based rank.
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Round to 2 decimal places (score precision of the persisted rows).
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Round to 4 decimal places (z-score diagnostics precision).
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
