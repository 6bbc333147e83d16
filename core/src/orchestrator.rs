//! Map-stage batch orchestrator.
//!
//! Partitions the provider universe into fixed shards and fans them out
//! to a bounded worker pool. Workers report back over a channel; the
//! orchestrator owns all retry and timeout state, so a worker only ever
//! scores one shard and writes one chunk. A timed-out attempt is
//! abandoned (its thread may still finish, but its result is ignored by
//! attempt tag) and the batch is re-queued until attempts run out.

use crate::chunk_store::ChunkStore;
use crate::config::RiskConfig;
use crate::error::{RiskError, RiskResult};
use crate::graph::OwnershipGraph;
use crate::pipeline;
use crate::source::TabularSource;
use crate::types::{BatchIndex, Npi, RunId};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

/// Terminal record for one batch of one run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_index: BatchIndex,
    pub state: BatchState,
    pub attempts: u32,
    pub rows_written: usize,
    /// Chunk key, absent for empty shards and failed batches.
    pub chunk_key: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub total_providers: usize,
    pub batches: Vec<BatchReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.state == BatchState::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.state == BatchState::Failed)
            .count()
    }

    pub fn total_rows(&self) -> usize {
        self.batches.iter().map(|b| b.rows_written).sum()
    }

    /// Indices of batches that persisted a chunk. This is the expected
    /// chunk set for the merge precondition; empty shards are excluded.
    pub fn chunk_batches(&self) -> Vec<BatchIndex> {
        self.batches
            .iter()
            .filter(|b| b.chunk_key.is_some())
            .map(|b| b.batch_index)
            .collect()
    }

    /// Error if any batch exhausted its attempts. The merge barrier must
    /// never run over a partial map stage.
    pub fn ensure_complete(&self) -> RiskResult<()> {
        if let Some(b) = self.batches.iter().find(|b| b.state == BatchState::Failed) {
            return Err(RiskError::BatchFailed {
                batch_index: b.batch_index,
                attempts: b.attempts,
                reason: b.error.clone().unwrap_or_else(|| "unknown".to_string()),
            });
        }
        Ok(())
    }
}

/// Outcome of one worker attempt. `attempt` lets the orchestrator drop
/// messages from attempts it already abandoned.
struct WorkerDone {
    batch_index: BatchIndex,
    attempt: u32,
    result: Result<(usize, Option<String>), String>,
}

pub struct BatchOrchestrator {
    source: Arc<dyn TabularSource>,
    graph: Option<Arc<dyn OwnershipGraph>>,
    chunks: Arc<dyn ChunkStore>,
    cfg: RiskConfig,
}

impl BatchOrchestrator {
    pub fn new(
        source: Arc<dyn TabularSource>,
        graph: Option<Arc<dyn OwnershipGraph>>,
        chunks: Arc<dyn ChunkStore>,
        cfg: RiskConfig,
    ) -> Self {
        Self {
            source,
            graph,
            chunks,
            cfg,
        }
    }

    /// Fixed-size shards in npi order. The last shard may be short.
    pub fn partition(npis: &[Npi], batch_size: usize) -> Vec<Vec<Npi>> {
        npis.chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    /// Run the map stage over the full provider universe (or a caller
    /// supplied subset) and return per-batch reports. Worker failures are
    /// recorded, not propagated; call `RunSummary::ensure_complete` before
    /// merging.
    pub fn run_map(&self, subset: Option<&[Npi]>) -> RiskResult<RunSummary> {
        self.cfg.validate()?;
        let run_id = uuid::Uuid::new_v4().to_string();

        let mut npis = match subset {
            Some(s) => s.to_vec(),
            None => self.source.all_npis()?,
        };
        npis.sort_unstable();
        npis.dedup();
        let total_providers = npis.len();

        let shards: Vec<Arc<Vec<Npi>>> = Self::partition(&npis, self.cfg.batch.batch_size)
            .into_iter()
            .map(Arc::new)
            .collect();
        log::info!(
            "run {run_id}: {total_providers} providers in {} batches",
            shards.len()
        );

        let mut reports: Vec<BatchReport> = (0..shards.len())
            .map(|i| BatchReport {
                batch_index: i,
                state: BatchState::Pending,
                attempts: 0,
                rows_written: 0,
                chunk_key: None,
                error: None,
            })
            .collect();

        let (tx, rx) = mpsc::channel::<WorkerDone>();
        let mut queue: VecDeque<(BatchIndex, u32)> =
            (0..shards.len()).map(|i| (i, 1)).collect();
        let mut in_flight: HashMap<BatchIndex, (u32, Instant)> = HashMap::new();
        let timeout = self.cfg.batch.timeout();
        let max_attempts = self.cfg.batch.max_attempts;

        loop {
            while in_flight.len() < self.cfg.batch.max_in_flight {
                let Some((idx, attempt)) = queue.pop_front() else {
                    break;
                };
                reports[idx].state = BatchState::Running;
                reports[idx].attempts = attempt;
                in_flight.insert(idx, (attempt, Instant::now()));
                self.spawn_worker(idx, attempt, Arc::clone(&shards[idx]), tx.clone());
            }

            if in_flight.is_empty() && queue.is_empty() {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(done) => {
                    let live = in_flight
                        .get(&done.batch_index)
                        .is_some_and(|&(attempt, _)| attempt == done.attempt);
                    if !live {
                        // Abandoned attempt finishing late.
                        continue;
                    }
                    in_flight.remove(&done.batch_index);
                    match done.result {
                        Ok((rows, key)) => {
                            let r = &mut reports[done.batch_index];
                            r.state = BatchState::Succeeded;
                            r.rows_written = rows;
                            r.chunk_key = key;
                            r.error = None;
                        }
                        Err(reason) => self.record_failure(
                            &mut reports,
                            &mut queue,
                            done.batch_index,
                            done.attempt,
                            reason,
                            max_attempts,
                        ),
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            // Deadline sweep over in-flight attempts.
            let expired: Vec<(BatchIndex, u32)> = in_flight
                .iter()
                .filter(|(_, &(_, started))| started.elapsed() > timeout)
                .map(|(&idx, &(attempt, _))| (idx, attempt))
                .collect();
            for (idx, attempt) in expired {
                in_flight.remove(&idx);
                self.record_failure(
                    &mut reports,
                    &mut queue,
                    idx,
                    attempt,
                    format!("timed out after {}s", timeout.as_secs()),
                    max_attempts,
                );
            }
        }

        self.chunks.commit()?;
        let summary = RunSummary {
            run_id,
            total_providers,
            batches: reports,
        };
        log::info!(
            "run {}: {} succeeded, {} failed, {} rows",
            summary.run_id,
            summary.succeeded(),
            summary.failed(),
            summary.total_rows()
        );
        Ok(summary)
    }

    fn record_failure(
        &self,
        reports: &mut [BatchReport],
        queue: &mut VecDeque<(BatchIndex, u32)>,
        idx: BatchIndex,
        attempt: u32,
        reason: String,
        max_attempts: u32,
    ) {
        let r = &mut reports[idx];
        r.error = Some(reason.clone());
        if attempt < max_attempts {
            log::warn!("batch {idx} attempt {attempt} failed ({reason}), retrying");
            r.state = BatchState::Retrying;
            queue.push_back((idx, attempt + 1));
        } else {
            log::error!("batch {idx} failed permanently after {attempt} attempt(s): {reason}");
            r.state = BatchState::Failed;
        }
    }

    fn spawn_worker(
        &self,
        batch_index: BatchIndex,
        attempt: u32,
        shard: Arc<Vec<Npi>>,
        tx: mpsc::Sender<WorkerDone>,
    ) {
        let source = Arc::clone(&self.source);
        let graph = self.graph.clone();
        let chunks = Arc::clone(&self.chunks);
        let cfg = self.cfg.clone();

        thread::spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(
                || -> RiskResult<(usize, Option<String>)> {
                    let npi_set: HashSet<Npi> = shard.iter().cloned().collect();
                    let payments = source.payments()?;
                    let providers = source.providers_for(&npi_set)?;
                    let exclusions = source.exclusions_for(&npi_set)?;
                    let rows = pipeline::score_batch(
                        &shard,
                        &payments,
                        &providers,
                        &exclusions,
                        graph.as_deref(),
                        &cfg,
                    )?;
                    if rows.is_empty() {
                        // A shard with no scoreable data persists nothing.
                        return Ok((0, None));
                    }
                    let key = chunks.write_chunk(batch_index, &rows)?;
                    Ok((rows.len(), Some(key)))
                },
            ));
            let result = match outcome {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("worker panicked".to_string()),
            };
            // The orchestrator may have moved on; a dead receiver is fine.
            let _ = tx.send(WorkerDone {
                batch_index,
                attempt,
                result,
            });
        });
    }
}
