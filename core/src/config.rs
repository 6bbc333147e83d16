//! Scoring configuration.
//!
//! All tunables live in one immutable `RiskConfig` value that is threaded
//! through every component call. Nothing in the engine reads ambient
//! globals, so the weights invariant can be checked in isolation.

use crate::error::{RiskError, RiskResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed component weights. Must sum to 1.0 — enforced by `validate()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComponentWeights {
    pub billing_outlier: f64,
    pub ownership_chain: f64,
    pub payment_trajectory: f64,
    pub exclusion_proximity: f64,
    pub program_concentration: f64,
}

impl ComponentWeights {
    pub fn sum(&self) -> f64 {
        self.billing_outlier
            + self.ownership_chain
            + self.payment_trajectory
            + self.exclusion_proximity
            + self.program_concentration
    }
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            billing_outlier: 0.30,
            ownership_chain: 0.25,
            payment_trajectory: 0.20,
            exclusion_proximity: 0.15,
            program_concentration: 0.10,
        }
    }
}

/// Risk label boundaries on the calibrated 0–100 score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LabelThresholds {
    pub high: f64,
    pub elevated: f64,
    pub moderate: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self {
            high: 80.0,
            elevated: 60.0,
            moderate: 30.0,
        }
    }
}

/// Map-stage execution policy consumed by the batch orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPolicy {
    /// Providers per shard.
    pub batch_size: usize,
    /// Maximum concurrently running workers.
    pub max_in_flight: usize,
    /// Per-attempt wall-clock budget, in seconds.
    pub timeout_secs: u64,
    /// Total attempts per batch (first run + retries).
    pub max_attempts: u32,
}

impl BatchPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_in_flight: 300,
            timeout_secs: 900,
            max_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Temporal decay factor: recent years count more.
    pub alpha: f64,
    /// Additive constant for the log transform, avoids log(0).
    pub epsilon: f64,
    /// MAD → sigma equivalence factor.
    pub mad_scale: f64,
    /// Minimum primary peer-group size before falling back to
    /// (taxonomy, year) with no state filter.
    pub peer_min_size: usize,
    /// Minimum claims for a provider-year to count as an eligible peer.
    pub peer_min_claims: f64,
    /// Trailing window of years to score.
    pub window_years: i32,
    pub weights: ComponentWeights,
    pub labels: LabelThresholds,
    pub batch: BatchPolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            epsilon: 1.0,
            mad_scale: 1.4826,
            peer_min_size: 50,
            peer_min_claims: 100.0,
            window_years: 5,
            weights: ComponentWeights::default(),
            labels: LabelThresholds::default(),
            batch: BatchPolicy::default(),
        }
    }
}

impl RiskConfig {
    /// Load from a JSON file. Missing file is an error; the caller decides
    /// whether to fall back to `RiskConfig::default()`.
    pub fn load(path: &str) -> RiskResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let cfg: RiskConfig = serde_json::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Enforce the weights invariant.
    pub fn validate(&self) -> RiskResult<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(RiskError::InvalidWeights { sum });
        }
        Ok(())
    }

    /// Config with small shard sizes for use in tests.
    pub fn default_test() -> Self {
        let mut cfg = Self::default();
        cfg.batch = BatchPolicy {
            batch_size: 10,
            max_in_flight: 4,
            timeout_secs: 30,
            max_attempts: 2,
        };
        cfg
    }
}
