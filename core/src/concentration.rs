//! Program concentration scorer.
//!
//! Over the most recent 3 years of a provider's data, the dominant
//! program's share of total payments drives the score: shares at or below
//! 0.5 score 0; above that, score = min(100, 200 * (share - 0.5)). The
//! top program is also resolved for flag text.

use crate::model::PaymentRecord;
use crate::stats;
use crate::types::Npi;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ConcentrationScore {
    pub score: f64,
    pub top_program: Option<String>,
}

pub fn compute_concentration_scores(
    payments: &[PaymentRecord],
) -> HashMap<Npi, ConcentrationScore> {
    let mut out = HashMap::new();
    if payments.is_empty() {
        return out;
    }

    let max_year = payments.iter().map(|p| p.year).max().unwrap_or(0);
    let min_year = max_year - 2;

    let mut program_totals: HashMap<(Npi, String), f64> = HashMap::new();
    let mut grand_totals: HashMap<Npi, f64> = HashMap::new();
    for p in payments.iter().filter(|p| p.year >= min_year) {
        *program_totals
            .entry((p.npi.clone(), p.program.clone()))
            .or_insert(0.0) += p.payments;
        *grand_totals.entry(p.npi.clone()).or_insert(0.0) += p.payments;
    }

    // Dominant program per provider: largest total, ties broken by name.
    let mut top: HashMap<Npi, (String, f64)> = HashMap::new();
    for ((npi, program), total) in program_totals {
        match top.get_mut(&npi) {
            Some(best) if total < best.1 || (total == best.1 && program >= best.0) => {}
            Some(best) => *best = (program, total),
            None => {
                top.insert(npi, (program, total));
            }
        }
    }

    for (npi, (program, prog_total)) in top {
        let grand = grand_totals.get(&npi).copied().unwrap_or(0.0);
        let share = prog_total / grand.max(1.0);
        let score = if share > 0.5 {
            (200.0 * (share - 0.5)).min(100.0)
        } else {
            0.0
        };
        out.insert(
            npi,
            ConcentrationScore {
                score: stats::round2(score),
                top_program: Some(program),
            },
        );
    }
    out
}
