//! Billing outlier scorer.
//!
//! Combines a provider's per-year peer z-scores into one [0, 100] score.
//! Only excess billing counts: z-scores are clipped to >= 0 before the
//! three metrics are averaged. Years are blended with exponential recency
//! decay (weight alpha^(max_year - year)) and the weighted z maps through
//! the logistic transform.

use crate::config::RiskConfig;
use crate::model::PeerMetricsRow;
use crate::stats;
use crate::types::{Npi, Year};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct BillingScore {
    pub score: f64,
    pub percentile: f64,
    pub peer_taxonomy: String,
    pub peer_state: String,
    pub peer_count: usize,
    /// Years contributing data, ascending.
    pub data_window_years: Vec<Year>,
}

pub fn compute_billing_scores(
    peer_metrics: &[PeerMetricsRow],
    cfg: &RiskConfig,
) -> HashMap<Npi, BillingScore> {
    let mut out = HashMap::new();
    if peer_metrics.is_empty() {
        return out;
    }

    let max_year = peer_metrics.iter().map(|r| r.year).max().unwrap_or(0);

    struct Acc {
        weighted_sum: f64,
        weight_total: f64,
        pct_sum: f64,
        years: Vec<Year>,
        /// (year, taxonomy, state, peer_count) of the most recent row seen.
        latest: (Year, String, String, usize),
    }

    let mut accs: HashMap<Npi, Acc> = HashMap::new();
    for r in peer_metrics {
        let w = cfg.alpha.powi(max_year - r.year);
        let avg_z = (r.z_lm1.max(0.0) + r.z_lm2.max(0.0) + r.z_lm3.max(0.0)) / 3.0;
        let acc = accs.entry(r.npi.clone()).or_insert_with(|| Acc {
            weighted_sum: 0.0,
            weight_total: 0.0,
            pct_sum: 0.0,
            years: Vec::new(),
            latest: (Year::MIN, String::new(), String::new(), 0),
        });
        acc.weighted_sum += w * avg_z;
        acc.weight_total += w;
        acc.pct_sum += r.m1_pct_rank;
        acc.years.push(r.year);
        if r.year > acc.latest.0 {
            acc.latest = (r.year, r.taxonomy_10.clone(), r.state.clone(), r.peer_count);
        }
    }

    for (npi, mut acc) in accs {
        acc.years.sort_unstable();
        let raw_z = acc.weighted_sum / acc.weight_total.max(1e-9);
        let n_years = acc.years.len() as f64;
        out.insert(
            npi,
            BillingScore {
                score: stats::round2(stats::map_to_score(raw_z)),
                percentile: stats::round2(acc.pct_sum / n_years),
                peer_taxonomy: acc.latest.1,
                peer_state: acc.latest.2,
                peer_count: acc.latest.3,
                data_window_years: acc.years,
            },
        );
    }
    out
}
