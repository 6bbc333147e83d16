//! Claidex risk scoring engine.
//!
//! Computes a per-provider fraud/anomaly risk score for the healthcare
//! provider population. Five components — billing outlier, ownership
//! chain, payment trajectory, exclusion proximity, and program
//! concentration — combine into a weighted raw composite, which a
//! population-wide merge pass calibrates to a 0–100 percentile score
//! with a risk label and human-readable flags.
//!
//! The compute is map/merge: the orchestrator shards the provider
//! universe into fixed batches scored independently by a bounded worker
//! pool, each batch persists a raw chunk, and the merge pass ranks the
//! whole population and upserts the final scores.

pub mod billing;
pub mod chunk_store;
pub mod composite;
pub mod concentration;
pub mod config;
pub mod error;
pub mod exclusion;
pub mod flags;
pub mod graph;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod ownership;
pub mod peer_metrics;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod store;
pub mod trajectory;
pub mod types;

pub use config::RiskConfig;
pub use error::{RiskError, RiskResult};
pub use model::{RawScoreRow, RiskLabel, RiskScore};
pub use orchestrator::{BatchOrchestrator, RunSummary};
