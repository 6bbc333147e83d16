//! Payment trajectory scorer.
//!
//! Year-over-year growth rate per provider, robust z-scored against peers
//! sharing the same (taxonomy-prefix, state, year), clipped to [0, 5] so
//! only upside growth anomalies count, then recency-decayed and mapped
//! through the logistic transform exactly like the billing scorer.
//!
//! Providers with no valid prior-year payment produce no row; downstream
//! treats them as zero.

use crate::config::RiskConfig;
use crate::model::PeerMetricsRow;
use crate::stats;
use crate::types::{Npi, Year};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct TrajectoryScore {
    pub score: f64,
    pub zscore: f64,
}

pub fn compute_trajectory_scores(
    peer_metrics: &[PeerMetricsRow],
    cfg: &RiskConfig,
) -> HashMap<Npi, TrajectoryScore> {
    let mut out = HashMap::new();
    if peer_metrics.is_empty() {
        return out;
    }

    // Order each provider's rows by year, then diff consecutive rows.
    let mut by_npi: HashMap<&str, Vec<&PeerMetricsRow>> = HashMap::new();
    for r in peer_metrics {
        by_npi.entry(r.npi.as_str()).or_default().push(r);
    }

    struct GrowthRow<'a> {
        npi: &'a str,
        year: Year,
        taxonomy_10: &'a str,
        state: &'a str,
        growth: f64,
    }

    let mut growth_rows: Vec<GrowthRow> = Vec::new();
    for rows in by_npi.values_mut() {
        rows.sort_by_key(|r| r.year);
        for pair in rows.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            let growth =
                (cur.total_payments - prev.total_payments) / prev.total_payments.max(1.0);
            growth_rows.push(GrowthRow {
                npi: cur.npi.as_str(),
                year: cur.year,
                taxonomy_10: cur.taxonomy_10.as_str(),
                state: cur.state.as_str(),
                growth,
            });
        }
    }

    if growth_rows.is_empty() {
        return out;
    }

    let max_year = growth_rows.iter().map(|g| g.year).max().unwrap_or(0);

    // Peer stats for growth rate per (taxonomy_10, state, year).
    let mut groups: HashMap<(&str, &str, Year), Vec<f64>> = HashMap::new();
    for g in &growth_rows {
        groups
            .entry((g.taxonomy_10, g.state, g.year))
            .or_default()
            .push(g.growth);
    }
    let group_stats: HashMap<(&str, &str, Year), (f64, f64)> = groups
        .into_iter()
        .map(|(k, col)| (k, stats::median_and_mad(&col)))
        .collect();

    struct Acc {
        weighted_sum: f64,
        weight_total: f64,
    }
    let mut accs: HashMap<Npi, Acc> = HashMap::new();

    for g in &growth_rows {
        let (med, mad) = group_stats[&(g.taxonomy_10, g.state, g.year)];
        // Only upside anomalies count.
        let z = stats::robust_z_from_stats(g.growth, med, mad, cfg.mad_scale).max(0.0);
        let w = cfg.alpha.powi(max_year - g.year);
        let acc = accs.entry(g.npi.to_string()).or_insert(Acc {
            weighted_sum: 0.0,
            weight_total: 0.0,
        });
        acc.weighted_sum += w * z;
        acc.weight_total += w;
    }

    for (npi, acc) in accs {
        let z = acc.weighted_sum / acc.weight_total.max(1e-9);
        out.insert(
            npi,
            TrajectoryScore {
                score: stats::round2(stats::map_to_score(z)),
                zscore: stats::round4(z),
            },
        );
    }
    out
}
