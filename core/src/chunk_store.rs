//! Durable chunk store between the map and merge stages.
//!
//! Each map batch persists its raw rows under a key derived from its
//! batch index; the merge pass lists and reads chunks one at a time so
//! peak memory stays bounded by a chunk, not the population. Writes are
//! write-once per index via tmp-file-then-rename, so a retried batch
//! that races its abandoned first attempt still leaves one valid chunk.

use crate::error::RiskResult;
use crate::model::RawScoreRow;
use crate::types::BatchIndex;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

pub trait ChunkStore: Send + Sync {
    /// Persist one batch's rows; returns the storage key.
    fn write_chunk(&self, batch_index: BatchIndex, rows: &[RawScoreRow]) -> RiskResult<String>;
    fn read_chunk(&self, batch_index: BatchIndex) -> RiskResult<Vec<RawScoreRow>>;
    /// Batch indices present in the store, ascending.
    fn list_chunks(&self) -> RiskResult<Vec<BatchIndex>>;
    /// Flush store state so a separate merge process sees every chunk.
    fn commit(&self) -> RiskResult<()>;
}

/// Filesystem-backed store: one JSON file per batch under a chunk
/// directory, named `batch_{index:06}.json`.
pub struct FsChunkStore {
    dir: PathBuf,
}

impl FsChunkStore {
    pub fn new(dir: impl Into<PathBuf>) -> RiskResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn chunk_name(batch_index: BatchIndex) -> String {
        format!("batch_{batch_index:06}.json")
    }

    fn chunk_path(&self, batch_index: BatchIndex) -> PathBuf {
        self.dir.join(Self::chunk_name(batch_index))
    }
}

impl ChunkStore for FsChunkStore {
    fn write_chunk(&self, batch_index: BatchIndex, rows: &[RawScoreRow]) -> RiskResult<String> {
        let path = self.chunk_path(batch_index);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(rows)?;
        // Flush the payload before the rename; otherwise a crash could
        // persist a rename that points at unwritten data.
        let mut file = File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;
        Ok(Self::chunk_name(batch_index))
    }

    fn read_chunk(&self, batch_index: BatchIndex) -> RiskResult<Vec<RawScoreRow>> {
        let body = fs::read(self.chunk_path(batch_index))?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn list_chunks(&self) -> RiskResult<Vec<BatchIndex>> {
        let mut indices = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name
                .strip_prefix("batch_")
                .and_then(|s| s.strip_suffix(".json"))
            {
                if let Ok(idx) = stem.parse::<BatchIndex>() {
                    indices.push(idx);
                }
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    fn commit(&self) -> RiskResult<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}
