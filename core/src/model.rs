//! Row types flowing through the scoring pipeline.
//!
//! The map stage produces `RawScoreRow` (pre-calibration, comparable only
//! within one full-population run). The merge stage is the only code that
//! turns raw rows into final `RiskScore` rows. Keeping these as distinct
//! types makes it impossible to treat a pre-merge row as authoritative.

use crate::config::LabelThresholds;
use crate::types::{Npi, Year};
use serde::{Deserialize, Serialize};

/// A provider as delivered by the upstream loader. Immutable within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub npi: Npi,
    pub display_name: String,
    pub taxonomy: String,
    pub state: String,
    pub is_excluded: bool,
}

/// One (provider, year, program) payment aggregate from the combined
/// payments view. Append-only within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub npi: Npi,
    pub year: Year,
    pub program: String,
    pub payments: f64,
    pub claims: f64,
    pub beneficiaries: f64,
    pub taxonomy: String,
    pub state: String,
}

/// One exclusion-registry entry. Active when not reinstated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRecord {
    pub npi: Npi,
    pub excl_date: String,
    pub reinstated: bool,
}

/// One (provider, year) row of peer-relative billing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMetricsRow {
    pub npi: Npi,
    pub year: Year,
    pub taxonomy_10: String,
    pub state: String,
    /// Size of the peer group the z-scores were computed against.
    pub peer_count: usize,
    /// Payments per claim, untransformed.
    pub m1: f64,
    /// Percentile rank of m1 within the peer group, 0–100.
    pub m1_pct_rank: f64,
    /// Robust z-scores of log(m1/m2/m3 + epsilon).
    pub z_lm1: f64,
    pub z_lm2: f64,
    pub z_lm3: f64,
    pub total_payments: f64,
    pub total_claims: f64,
}

/// Aggregate counts from one provider's resolved ownership chain.
/// Derived transiently per run, never persisted on its own.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OwnershipChainResult {
    pub chain_provider_count: u32,
    pub chain_excluded_count: u32,
    pub owner_excluded: bool,
}

/// The five component scores plus diagnostics, keyed by provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub npi: Npi,
    pub billing_outlier_score: f64,
    pub billing_outlier_percentile: f64,
    pub ownership_chain_risk: f64,
    pub payment_trajectory_score: f64,
    pub payment_trajectory_zscore: f64,
    pub exclusion_proximity_score: f64,
    pub program_concentration_score: f64,
    pub chain_excluded_count: u32,
    pub peer_taxonomy: String,
    pub peer_state: String,
    pub peer_count: usize,
    /// Years contributing data, ascending.
    pub data_window_years: Vec<Year>,
    pub top_program: Option<String>,
}

/// A map-stage output row: components, the raw weighted composite, and the
/// rule flags. No calibrated score and no label — those exist only after
/// the merge pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScoreRow {
    pub components: ScoreComponents,
    /// Immutable once computed by a batch; the merge pass only ranks it.
    pub r_raw: f64,
    pub flags: Vec<String>,
    pub updated_at: String,
}

/// Final risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLabel {
    Low,
    Moderate,
    Elevated,
    High,
}

impl RiskLabel {
    /// Descending-threshold scan over the calibrated score.
    pub fn from_score(score: f64, t: &LabelThresholds) -> Self {
        if score >= t.high {
            RiskLabel::High
        } else if score >= t.elevated {
            RiskLabel::Elevated
        } else if score >= t.moderate {
            RiskLabel::Moderate
        } else {
            RiskLabel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Low => "Low",
            RiskLabel::Moderate => "Moderate",
            RiskLabel::Elevated => "Elevated",
            RiskLabel::High => "High",
        }
    }
}

/// The final output entity, created only by the merge pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub npi: Npi,
    /// Global percentile calibration of r_raw, 0–100.
    pub risk_score: f64,
    pub risk_label: RiskLabel,
    pub r_raw: f64,
    pub components: ScoreComponents,
    pub flags: Vec<String>,
    pub updated_at: String,
}
