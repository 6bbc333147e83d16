use crate::types::BatchIndex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Graph store unavailable: {reason}")]
    GraphUnavailable { reason: String },

    #[error("Component weights sum to {sum}, expected 1.0")]
    InvalidWeights { sum: f64 },

    #[error("Merge precondition failed: expected {expected} chunks, found {found}")]
    IncompleteChunkSet { expected: usize, found: usize },

    #[error("Chunk store holds {extra} chunk(s) not produced by this run; clean the store or merge it explicitly")]
    StaleChunkSet { extra: usize },

    #[error("Batch {batch_index} failed after {attempts} attempt(s): {reason}")]
    BatchFailed {
        batch_index: BatchIndex,
        attempts: u32,
        reason: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RiskResult<T> = Result<T, RiskError>;
