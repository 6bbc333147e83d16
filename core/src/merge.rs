//! Merge pass: raw chunks in, calibrated scores out.
//!
//! Runs strictly after the map stage. Verifies the expected chunk set is
//! present, streams chunks one at a time into the r_raw column, ranks the
//! whole population, attaches labels, and optionally upserts into the
//! score store. Re-running the merge over the same chunks is idempotent.

use crate::chunk_store::ChunkStore;
use crate::composite;
use crate::config::RiskConfig;
use crate::error::{RiskError, RiskResult};
use crate::model::{RawScoreRow, RiskScore};
use crate::store::RiskStore;
use crate::types::BatchIndex;

/// Merge every available chunk into the final score set.
///
/// `expected` is the chunk set the map stage reported: exactly those
/// chunks are merged, and the store must hold nothing else. `None`
/// skips the check and merges whatever is present (merge-only reruns
/// over an existing chunk directory).
pub fn run_merge(
    chunks: &dyn ChunkStore,
    expected: Option<&[BatchIndex]>,
    cfg: &RiskConfig,
    sink: Option<&RiskStore>,
) -> RiskResult<Vec<RiskScore>> {
    let listed = chunks.list_chunks()?;

    // With an expected set, merge exactly that set: a missing chunk means
    // the map stage is incomplete, and an extra chunk means the store
    // still holds another run's output — either one would corrupt the
    // global calibration.
    let to_merge: Vec<BatchIndex> = match expected {
        Some(expected) => {
            let found = expected.iter().filter(|i| listed.contains(i)).count();
            if found != expected.len() {
                return Err(RiskError::IncompleteChunkSet {
                    expected: expected.len(),
                    found,
                });
            }
            let extra = listed.iter().filter(|i| !expected.contains(i)).count();
            if extra > 0 {
                return Err(RiskError::StaleChunkSet { extra });
            }
            let mut indices = expected.to_vec();
            indices.sort_unstable();
            indices
        }
        None => listed,
    };

    let mut rows: Vec<RawScoreRow> = Vec::new();
    for idx in &to_merge {
        let chunk = chunks.read_chunk(*idx)?;
        log::debug!("merge: chunk {idx} with {} rows", chunk.len());
        rows.extend(chunk);
    }
    if rows.is_empty() {
        log::warn!("merge: no raw rows found, nothing to calibrate");
        return Ok(Vec::new());
    }

    let r_raw: Vec<f64> = rows.iter().map(|r| r.r_raw).collect();
    let calibrated = composite::calibrate(&r_raw);

    let mut scores: Vec<RiskScore> = rows
        .into_iter()
        .zip(calibrated)
        .map(|(row, score)| RiskScore {
            npi: row.components.npi.clone(),
            risk_score: score,
            risk_label: composite::risk_label(score, &cfg.labels),
            r_raw: row.r_raw,
            components: row.components,
            flags: row.flags,
            updated_at: row.updated_at,
        })
        .collect();
    scores.sort_by(|a, b| a.npi.cmp(&b.npi));

    if let Some(store) = sink {
        store.upsert_scores(&scores)?;
        log::info!("merge: upserted {} scores", scores.len());
    }
    Ok(scores)
}
