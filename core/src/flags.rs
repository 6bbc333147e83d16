//! Human-readable rule flags.
//!
//! Each rule fires independently; several can co-fire on one provider.
//! A provider below every threshold gets no flags.

use crate::model::ScoreComponents;

pub fn generate_flags(c: &ScoreComponents) -> Vec<String> {
    let mut flags = Vec::new();

    if c.billing_outlier_percentile >= 95.0 {
        flags.push(
            "Billing > 95th percentile vs. state/taxonomy peers (payments per claim).".to_string(),
        );
    }
    if c.billing_outlier_score >= 80.0 && c.payment_trajectory_score >= 60.0 {
        flags.push("Rapid growth and high billing intensity vs. peers.".to_string());
    }
    if c.ownership_chain_risk >= 50.0 {
        let n = c.chain_excluded_count;
        flags.push(format!(
            "Ownership chain includes {n} excluded provider{}.",
            if n != 1 { "s" } else { "" }
        ));
    }
    if c.program_concentration_score >= 60.0 {
        let prog_label = c
            .top_program
            .as_ref()
            .map(|p| format!(" ({p})"))
            .unwrap_or_default();
        flags.push(format!(
            "Highly concentrated in a single payer program{prog_label}."
        ));
    }
    if c.exclusion_proximity_score >= 80.0 {
        flags.push("Direct or owner-level exclusion on record.".to_string());
    }

    flags
}
