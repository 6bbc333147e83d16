//! Map-stage scoring pipeline.
//!
//! `score_batch` scores one shard of providers and produces
//! pre-calibration `RawScoreRow`s. Peer statistics come from the full
//! payment table, which every worker reads from the shared source:
//! medians, MADs, and percent ranks must be identical no matter how the
//! universe is sharded, so a K-batch run and a single-batch run produce
//! the same r_raw per provider. Only the graph query and the exclusion
//! registry lookup are shard-local. Calibration happens later, in the
//! merge pass.

use crate::billing;
use crate::composite;
use crate::concentration;
use crate::config::RiskConfig;
use crate::error::RiskResult;
use crate::exclusion;
use crate::flags;
use crate::graph::OwnershipGraph;
use crate::model::{ExclusionRecord, PaymentRecord, Provider, RawScoreRow, ScoreComponents};
use crate::ownership;
use crate::peer_metrics;
use crate::trajectory;
use crate::types::Npi;
use std::collections::HashSet;

pub fn score_batch(
    shard: &[Npi],
    payments: &[PaymentRecord],
    providers: &[Provider],
    exclusions: &[ExclusionRecord],
    graph: Option<&dyn OwnershipGraph>,
    cfg: &RiskConfig,
) -> RiskResult<Vec<RawScoreRow>> {
    cfg.validate()?;

    // Trailing data window, anchored on the newest year in the run.
    let max_year = match payments.iter().map(|p| p.year).max() {
        Some(y) => y,
        None => return Ok(Vec::new()),
    };
    let min_year = max_year - cfg.window_years + 1;
    let windowed: Vec<PaymentRecord> = payments
        .iter()
        .filter(|p| p.year >= min_year)
        .cloned()
        .collect();

    // Scored universe: shard providers with at least one windowed payment.
    let with_data: HashSet<&str> = windowed.iter().map(|p| p.npi.as_str()).collect();
    let mut npis: Vec<Npi> = shard
        .iter()
        .filter(|npi| with_data.contains(npi.as_str()))
        .cloned()
        .collect();
    npis.sort_unstable();
    npis.dedup();
    if npis.is_empty() {
        return Ok(Vec::new());
    }

    let metrics = peer_metrics::compute_peer_metrics(&windowed, cfg);
    let billing_scores = billing::compute_billing_scores(&metrics, cfg);
    let trajectory_scores = trajectory::compute_trajectory_scores(&metrics, cfg);
    let concentration_scores = concentration::compute_concentration_scores(&windowed);
    let ownership_risk = ownership::resolve_ownership_risk(graph, &npis, providers);
    let proximity = exclusion::compute_exclusion_proximity(exclusions, &npis, &ownership_risk);

    let updated_at = chrono::Utc::now().to_rfc3339();
    let mut rows = Vec::with_capacity(npis.len());
    for npi in npis {
        let b = billing_scores.get(&npi);
        let t = trajectory_scores.get(&npi).copied();
        let c = concentration_scores.get(&npi);
        let o = ownership_risk.get(&npi).copied().unwrap_or_default();

        let components = ScoreComponents {
            billing_outlier_score: b.map(|b| b.score).unwrap_or(0.0),
            billing_outlier_percentile: b.map(|b| b.percentile).unwrap_or(0.0),
            ownership_chain_risk: o.chain_risk,
            payment_trajectory_score: t.map(|t| t.score).unwrap_or(0.0),
            payment_trajectory_zscore: t.map(|t| t.zscore).unwrap_or(0.0),
            exclusion_proximity_score: proximity.get(&npi).copied().unwrap_or(0.0),
            program_concentration_score: c.map(|c| c.score).unwrap_or(0.0),
            chain_excluded_count: o.chain_excluded_count,
            peer_taxonomy: b.map(|b| b.peer_taxonomy.clone()).unwrap_or_default(),
            peer_state: b.map(|b| b.peer_state.clone()).unwrap_or_default(),
            peer_count: b.map(|b| b.peer_count).unwrap_or(0),
            data_window_years: b.map(|b| b.data_window_years.clone()).unwrap_or_default(),
            top_program: c.and_then(|c| c.top_program.clone()),
            npi,
        };

        let r_raw = composite::composite_raw(&components, &cfg.weights);
        let flags = flags::generate_flags(&components);
        rows.push(RawScoreRow {
            components,
            r_raw,
            flags,
            updated_at: updated_at.clone(),
        });
    }
    Ok(rows)
}
