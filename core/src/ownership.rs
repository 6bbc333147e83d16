//! Ownership chain risk resolution.
//!
//! Wraps the graph traversal with the batch failure policy: if the graph
//! store is missing or the bulk query errors, every provider in the batch
//! degrades to zero ownership risk. The batch always completes.

use crate::graph::OwnershipGraph;
use crate::model::{OwnershipChainResult, Provider};
use crate::stats;
use crate::types::Npi;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipRisk {
    /// min(100, 100 * excluded / max(total, 1)), 2 decimals.
    pub chain_risk: f64,
    pub chain_excluded_count: u32,
    pub owner_excluded: bool,
}

pub fn chain_risk_score(chain: &OwnershipChainResult) -> f64 {
    let total = chain.chain_provider_count.max(1) as f64;
    stats::round2((100.0 * chain.chain_excluded_count as f64 / total).min(100.0))
}

/// Resolve ownership risk for every npi in the batch.
pub fn resolve_ownership_risk(
    graph: Option<&dyn OwnershipGraph>,
    npis: &[Npi],
    providers: &[Provider],
) -> HashMap<Npi, OwnershipRisk> {
    let zeros = || -> HashMap<Npi, OwnershipRisk> {
        npis.iter()
            .map(|npi| (npi.clone(), OwnershipRisk::default()))
            .collect()
    };

    let graph = match graph {
        Some(g) => g,
        None => return zeros(),
    };

    let names: HashMap<&str, &str> = providers
        .iter()
        .map(|p| (p.npi.as_str(), p.display_name.as_str()))
        .collect();
    let batch: Vec<(Npi, String)> = npis
        .iter()
        .map(|npi| {
            (
                npi.clone(),
                names.get(npi.as_str()).copied().unwrap_or("").to_string(),
            )
        })
        .collect();

    let chains = match graph.resolve_chains(&batch) {
        Ok(chains) => chains,
        Err(e) => {
            log::warn!("ownership graph query failed, zeroing batch: {e}");
            return zeros();
        }
    };

    npis.iter()
        .map(|npi| {
            let risk = chains
                .get(npi)
                .map(|c| OwnershipRisk {
                    chain_risk: chain_risk_score(c),
                    chain_excluded_count: c.chain_excluded_count,
                    owner_excluded: c.owner_excluded,
                })
                .unwrap_or_default();
            (npi.clone(), risk)
        })
        .collect()
}
