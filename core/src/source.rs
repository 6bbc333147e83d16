//! Tabular data source.
//!
//! The loader that produces provider/payment/exclusion records is an
//! external collaborator; the engine reads it through `TabularSource`.
//! Implementations are read-only and shared across workers without
//! locking. Provider and exclusion reads are filterable by provider-id
//! set (each worker needs only its shard's names and registry rows);
//! payment reads return the full run's table, because peer statistics
//! are defined over the whole population — a shard-local median would
//! make final scores depend on how the universe was partitioned.

use crate::error::RiskResult;
use crate::model::{ExclusionRecord, PaymentRecord, Provider};
use crate::types::Npi;
use std::collections::HashSet;
use std::path::Path;

pub trait TabularSource: Send + Sync {
    /// The full provider-id universe for a run, deduplicated.
    fn all_npis(&self) -> RiskResult<Vec<Npi>>;
    fn providers_for(&self, npis: &HashSet<Npi>) -> RiskResult<Vec<Provider>>;
    /// The full payment table for the run (all providers, all window
    /// years): the peer-statistics baseline every worker shares.
    fn payments(&self) -> RiskResult<Vec<PaymentRecord>>;
    fn exclusions_for(&self, npis: &HashSet<Npi>) -> RiskResult<Vec<ExclusionRecord>>;
}

/// Pre-loaded frames held in memory, the shape the batch platform hands
/// workers after staging input files.
pub struct InMemorySource {
    providers: Vec<Provider>,
    payments: Vec<PaymentRecord>,
    exclusions: Vec<ExclusionRecord>,
}

impl InMemorySource {
    pub fn new(
        providers: Vec<Provider>,
        payments: Vec<PaymentRecord>,
        exclusions: Vec<ExclusionRecord>,
    ) -> Self {
        Self {
            providers,
            payments,
            exclusions,
        }
    }

    /// Load `providers.json`, `payments.json`, and `exclusions.json` from
    /// a staged data directory. `exclusions.json` may be absent.
    pub fn from_json_dir(dir: &Path) -> RiskResult<Self> {
        let read = |name: &str| -> RiskResult<String> {
            let path = dir.join(name);
            Ok(std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?)
        };
        let providers: Vec<Provider> = serde_json::from_str(&read("providers.json")?)?;
        let payments: Vec<PaymentRecord> = serde_json::from_str(&read("payments.json")?)?;
        let exclusions: Vec<ExclusionRecord> = if dir.join("exclusions.json").exists() {
            serde_json::from_str(&read("exclusions.json")?)?
        } else {
            Vec::new()
        };
        Ok(Self::new(providers, payments, exclusions))
    }
}

impl TabularSource for InMemorySource {
    fn all_npis(&self) -> RiskResult<Vec<Npi>> {
        let mut npis: Vec<Npi> = self.providers.iter().map(|p| p.npi.clone()).collect();
        npis.sort_unstable();
        npis.dedup();
        Ok(npis)
    }

    fn providers_for(&self, npis: &HashSet<Npi>) -> RiskResult<Vec<Provider>> {
        Ok(self
            .providers
            .iter()
            .filter(|p| npis.contains(&p.npi))
            .cloned()
            .collect())
    }

    fn payments(&self) -> RiskResult<Vec<PaymentRecord>> {
        Ok(self.payments.clone())
    }

    fn exclusions_for(&self, npis: &HashSet<Npi>) -> RiskResult<Vec<ExclusionRecord>> {
        Ok(self
            .exclusions
            .iter()
            .filter(|e| npis.contains(&e.npi))
            .cloned()
            .collect())
    }
}
