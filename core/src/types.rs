//! Shared primitive types used across the entire scoring engine.

/// National Provider Identifier — the unique provider key.
pub type Npi = String;

/// A calendar year of payment data.
pub type Year = i32;

/// Index of one fixed-size shard of the provider universe.
pub type BatchIndex = usize;

/// The canonical run identifier.
pub type RunId = String;
