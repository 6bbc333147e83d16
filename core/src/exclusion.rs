//! Exclusion proximity scorer.
//!
//! Rule-based tiering against the direct-exclusion registry (active =
//! not reinstated) and the ownership chain sets:
//!   direct exclusion                 -> 100
//!   owning entity directly excluded  ->  80
//!   chain contains excluded provider ->  50
//!   otherwise                        ->   0

use crate::model::ExclusionRecord;
use crate::ownership::OwnershipRisk;
use crate::types::Npi;
use std::collections::{HashMap, HashSet};

pub fn compute_exclusion_proximity(
    exclusions: &[ExclusionRecord],
    npis: &[Npi],
    ownership: &HashMap<Npi, OwnershipRisk>,
) -> HashMap<Npi, f64> {
    let directly_excluded: HashSet<&str> = exclusions
        .iter()
        .filter(|e| !e.reinstated)
        .map(|e| e.npi.as_str())
        .collect();

    npis.iter()
        .map(|npi| {
            let own = ownership.get(npi).copied().unwrap_or_default();
            let score = if directly_excluded.contains(npi.as_str()) {
                100.0
            } else if own.owner_excluded {
                80.0
            } else if own.chain_excluded_count > 0 {
                50.0
            } else {
                0.0
            };
            (npi.clone(), score)
        })
        .collect()
}
