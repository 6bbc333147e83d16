//! Map/merge integration tests: orchestration, chunk persistence, the
//! merge barrier, and the SQLite sink.

use claidex_core::chunk_store::{ChunkStore, FsChunkStore};
use claidex_core::config::RiskConfig;
use claidex_core::error::{RiskError, RiskResult};
use claidex_core::merge::run_merge;
use claidex_core::model::{ExclusionRecord, PaymentRecord, Provider, RiskLabel, RiskScore};
use claidex_core::orchestrator::BatchOrchestrator;
use claidex_core::source::{InMemorySource, TabularSource};
use claidex_core::store::RiskStore;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("claidex-test-{tag}-{}", uuid::Uuid::new_v4()))
}

/// Deterministic synthetic population: `n` providers with 2-5 years of
/// payments each across a couple of programs.
fn population(seed: u64, n: usize) -> InMemorySource {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut providers = Vec::new();
    let mut payments = Vec::new();
    let mut exclusions = Vec::new();

    for i in 0..n {
        let npi = format!("{:010}", 1_000_000_000u64 + i as u64);
        let state = ["CA", "TX"][rng.gen_range(0..2)];
        let base = rng.gen_range(100.0..500.0);
        let years = rng.gen_range(2..=5);
        for year in (2026 - years)..2026 {
            for program in ["medicare", "medicaid"].iter().take(rng.gen_range(1..=2)) {
                let claims = rng.gen_range(100.0..1500.0_f64).floor();
                payments.push(PaymentRecord {
                    npi: npi.clone(),
                    year,
                    program: program.to_string(),
                    payments: base * claims * rng.gen_range(0.8..1.4),
                    claims,
                    beneficiaries: (claims * 0.6).floor(),
                    taxonomy: "207R00000X".to_string(),
                    state: state.to_string(),
                });
            }
        }
        if i % 37 == 0 {
            exclusions.push(ExclusionRecord {
                npi: npi.clone(),
                excl_date: "2023-01-01".to_string(),
                reinstated: false,
            });
        }
        providers.push(Provider {
            npi,
            display_name: format!("Provider {i} Medical Office"),
            taxonomy: "207R00000X".to_string(),
            state: state.to_string(),
            is_excluded: false,
        });
    }
    InMemorySource::new(providers, payments, exclusions)
}

fn run_once(source: Arc<dyn TabularSource>, cfg: &RiskConfig, tag: &str) -> Vec<RiskScore> {
    let chunks = Arc::new(FsChunkStore::new(temp_dir(tag)).unwrap());
    let orch = BatchOrchestrator::new(source, None, chunks.clone(), cfg.clone());
    let summary = orch.run_map(None).unwrap();
    summary.ensure_complete().unwrap();
    run_merge(&*chunks, Some(&summary.chunk_batches()), cfg, None).unwrap()
}

/// Every provider with payments gets exactly one final score, ordered by
/// npi, calibrated into [0, 100] with matching labels.
#[test]
fn map_merge_scores_whole_population() {
    let cfg = RiskConfig::default_test();
    let source = Arc::new(population(7, 60));
    let scores = run_once(source, &cfg, "whole");

    assert_eq!(scores.len(), 60);
    for pair in scores.windows(2) {
        assert!(pair[0].npi < pair[1].npi, "output must be npi-sorted");
    }
    for s in &scores {
        assert!((0.0..=100.0).contains(&s.risk_score));
        assert_eq!(s.risk_label, RiskLabel::from_score(s.risk_score, &cfg.labels));
    }
    // Global calibration pins the extremes of the population.
    assert!(scores.iter().any(|s| s.risk_score == 0.0));
    assert!(scores.iter().any(|s| s.risk_score == 100.0));
}

/// Partitioning the population into K batches yields the same final
/// scores and labels as scoring it in one batch: peer statistics and
/// calibration are population-wide, never shard-local.
#[test]
fn sharding_does_not_change_scores() {
    let source = Arc::new(population(99, 55));

    let mut one = RiskConfig::default_test();
    one.batch.batch_size = 100;
    let single = run_once(source.clone(), &one, "equiv-one");

    let mut many = RiskConfig::default_test();
    many.batch.batch_size = 7;
    let sharded = run_once(source, &many, "equiv-many");

    assert_eq!(single.len(), sharded.len());
    for (a, b) in single.iter().zip(&sharded) {
        assert_eq!(a.npi, b.npi);
        assert_eq!(a.r_raw, b.r_raw, "r_raw drifted for {}", a.npi);
        assert_eq!(a.risk_score, b.risk_score, "score drifted for {}", a.npi);
        assert_eq!(a.risk_label, b.risk_label);
        assert_eq!(a.flags, b.flags);
    }
}

/// The same population and policy produce byte-identical scores across
/// runs, regardless of worker scheduling.
#[test]
fn runs_are_deterministic() {
    let cfg = RiskConfig::default_test();
    let source = Arc::new(population(42, 50));
    let a = run_once(source.clone(), &cfg, "det-a");
    let b = run_once(source, &cfg, "det-b");

    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.npi, y.npi);
        assert_eq!(x.risk_score, y.risk_score);
        assert_eq!(x.r_raw, y.r_raw);
        assert_eq!(x.flags, y.flags);
    }
}

/// A provider with no payment rows yields an empty shard, which writes
/// no chunk and appears nowhere in the merged output.
#[test]
fn empty_shards_write_nothing() {
    let mut cfg = RiskConfig::default_test();
    cfg.batch.batch_size = 1;

    let mut source = population(3, 2);
    // Third provider with zero payment history.
    source = {
        let npis = source.all_npis().unwrap();
        let mut providers: Vec<Provider> = source
            .providers_for(&npis.iter().cloned().collect())
            .unwrap();
        let payments = source.payments().unwrap();
        providers.push(Provider {
            npi: "9999999999".to_string(),
            display_name: "Ghost Practice".to_string(),
            taxonomy: "207R00000X".to_string(),
            state: "CA".to_string(),
            is_excluded: false,
        });
        InMemorySource::new(providers, payments, vec![])
    };

    let chunks = Arc::new(FsChunkStore::new(temp_dir("empty-shard")).unwrap());
    let orch = BatchOrchestrator::new(Arc::new(source), None, chunks.clone(), cfg.clone());
    let summary = orch.run_map(None).unwrap();
    summary.ensure_complete().unwrap();

    assert_eq!(summary.batches.len(), 3);
    assert_eq!(summary.chunk_batches().len(), 2);

    let scores = run_merge(&*chunks, Some(&summary.chunk_batches()), &cfg, None).unwrap();
    assert_eq!(scores.len(), 2);
    assert!(scores.iter().all(|s| s.npi != "9999999999"));
}

/// The merge barrier refuses to run over a partial chunk set.
#[test]
fn merge_rejects_missing_chunks() {
    let mut cfg = RiskConfig::default_test();
    cfg.batch.batch_size = 10;
    let dir = temp_dir("missing-chunk");
    let chunks = Arc::new(FsChunkStore::new(dir.clone()).unwrap());
    let orch =
        BatchOrchestrator::new(Arc::new(population(11, 20)), None, chunks.clone(), cfg.clone());
    let summary = orch.run_map(None).unwrap();
    let expected = summary.chunk_batches();
    assert_eq!(expected.len(), 2);

    std::fs::remove_file(dir.join("batch_000001.json")).unwrap();

    let err = run_merge(&*chunks, Some(&expected), &cfg, None).unwrap_err();
    match err {
        RiskError::IncompleteChunkSet { expected, found } => {
            assert_eq!(expected, 2);
            assert_eq!(found, 1);
        }
        other => panic!("expected IncompleteChunkSet, got {other}"),
    }
}

/// A reused chunk directory holding a previous run's higher-indexed
/// chunks must not leak stale rows into the calibration: the barrier
/// rejects chunks outside the expected set.
#[test]
fn merge_rejects_stale_chunks_from_prior_run() {
    let dir = temp_dir("stale-chunks");
    let chunks = Arc::new(FsChunkStore::new(dir.clone()).unwrap());
    let source = Arc::new(population(31, 30));

    // First run: 6 small batches leave chunks 0..=5 behind.
    let mut small = RiskConfig::default_test();
    small.batch.batch_size = 5;
    let orch = BatchOrchestrator::new(source.clone(), None, chunks.clone(), small);
    orch.run_map(None).unwrap();

    // Second run into the same directory: one big batch, chunk 0 only.
    let mut big = RiskConfig::default_test();
    big.batch.batch_size = 100;
    let orch = BatchOrchestrator::new(source, None, chunks.clone(), big.clone());
    let summary = orch.run_map(None).unwrap();
    let expected = summary.chunk_batches();
    assert_eq!(expected, vec![0]);

    let err = run_merge(&*chunks, Some(&expected), &big, None).unwrap_err();
    match err {
        RiskError::StaleChunkSet { extra } => assert_eq!(extra, 5),
        other => panic!("expected StaleChunkSet, got {other}"),
    }

    // Once the stale chunks are cleared the barrier passes and every
    // provider has exactly one row.
    for idx in 1..=5 {
        std::fs::remove_file(dir.join(format!("batch_{idx:06}.json"))).unwrap();
    }
    let scores = run_merge(&*chunks, Some(&expected), &big, None).unwrap();
    assert_eq!(scores.len(), 30);
    let distinct: HashSet<&str> = scores.iter().map(|s| s.npi.as_str()).collect();
    assert_eq!(distinct.len(), 30);
}

/// Chunk writes land atomically: one final file per index, no tmp
/// leftovers, and the payload reads back intact.
#[test]
fn chunk_write_is_atomic_and_readable() {
    let dir = temp_dir("atomic-chunk");
    let chunks = FsChunkStore::new(dir.clone()).unwrap();
    let cfg = RiskConfig::default_test();
    let source = population(13, 5);
    let npis = source.all_npis().unwrap();
    let rows = claidex_core::pipeline::score_batch(
        &npis,
        &source.payments().unwrap(),
        &source.providers_for(&npis.iter().cloned().collect()).unwrap(),
        &[],
        None,
        &cfg,
    )
    .unwrap();

    let key = chunks.write_chunk(0, &rows).unwrap();
    assert_eq!(key, "batch_000000.json");

    let names: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["batch_000000.json"], "no tmp files may remain");

    let back = chunks.read_chunk(0).unwrap();
    assert_eq!(back.len(), rows.len());
    assert_eq!(back[0].components.npi, rows[0].components.npi);
    assert_eq!(back[0].r_raw, rows[0].r_raw);
}

/// A source whose payment reads always fail exhausts every attempt and
/// surfaces as a failed run, never a hang.
struct BrokenSource;

impl TabularSource for BrokenSource {
    fn all_npis(&self) -> RiskResult<Vec<String>> {
        Ok(vec!["0000000001".to_string(), "0000000002".to_string()])
    }
    fn providers_for(&self, _npis: &HashSet<String>) -> RiskResult<Vec<Provider>> {
        Ok(vec![])
    }
    fn payments(&self) -> RiskResult<Vec<PaymentRecord>> {
        Err(RiskError::GraphUnavailable {
            reason: "payments table offline".to_string(),
        })
    }
    fn exclusions_for(&self, _npis: &HashSet<String>) -> RiskResult<Vec<ExclusionRecord>> {
        Ok(vec![])
    }
}

#[test]
fn failing_batches_exhaust_attempts() {
    let cfg = RiskConfig::default_test();
    let chunks = Arc::new(FsChunkStore::new(temp_dir("broken")).unwrap());
    let orch = BatchOrchestrator::new(Arc::new(BrokenSource), None, chunks, cfg.clone());
    let summary = orch.run_map(None).unwrap();

    assert_eq!(summary.failed(), 1);
    let batch = &summary.batches[0];
    assert_eq!(batch.attempts, cfg.batch.max_attempts);
    assert!(summary.ensure_complete().is_err());
}

/// Graph store forced unavailable for every batch: the run still
/// completes and every provider carries zero ownership risk.
struct OutageGraph;

impl claidex_core::graph::OwnershipGraph for OutageGraph {
    fn resolve_chains(
        &self,
        _batch: &[(String, String)],
    ) -> RiskResult<std::collections::HashMap<String, claidex_core::model::OwnershipChainResult>>
    {
        Err(RiskError::GraphUnavailable {
            reason: "simulated outage".to_string(),
        })
    }
}

#[test]
fn graph_outage_zeroes_ownership_for_whole_run() {
    let cfg = RiskConfig::default_test();
    let source = Arc::new(population(5, 40));
    let chunks = Arc::new(FsChunkStore::new(temp_dir("outage")).unwrap());
    let orch = BatchOrchestrator::new(
        source,
        Some(Arc::new(OutageGraph)),
        chunks.clone(),
        cfg.clone(),
    );
    let summary = orch.run_map(None).unwrap();
    summary.ensure_complete().unwrap();

    let scores = run_merge(&*chunks, Some(&summary.chunk_batches()), &cfg, None).unwrap();
    assert_eq!(scores.len(), 40);
    for s in &scores {
        assert_eq!(s.components.ownership_chain_risk, 0.0);
        assert_eq!(s.components.chain_excluded_count, 0);
    }
}

/// Re-merging the same chunks into the same store is idempotent.
#[test]
fn merge_upsert_is_idempotent() {
    let cfg = RiskConfig::default_test();
    let source = Arc::new(population(19, 30));
    let chunks = Arc::new(FsChunkStore::new(temp_dir("idempotent")).unwrap());
    let orch = BatchOrchestrator::new(source, None, chunks.clone(), cfg.clone());
    let summary = orch.run_map(None).unwrap();
    summary.ensure_complete().unwrap();
    let expected = summary.chunk_batches();

    let store = RiskStore::in_memory().unwrap();
    store.migrate().unwrap();

    let first = run_merge(&*chunks, Some(&expected), &cfg, Some(&store)).unwrap();
    assert_eq!(store.score_count().unwrap(), 30);
    let probe = store.get_score(&first[0].npi).unwrap().unwrap();

    let second = run_merge(&*chunks, Some(&expected), &cfg, Some(&store)).unwrap();
    assert_eq!(store.score_count().unwrap(), 30);
    let reprobe = store.get_score(&second[0].npi).unwrap().unwrap();
    assert_eq!(probe.risk_score, reprobe.risk_score);
    assert_eq!(probe.r_raw, reprobe.r_raw);
    assert_eq!(probe.risk_label, reprobe.risk_label);
}

/// Merge-only mode (no expected set) sweeps whatever chunks exist.
#[test]
fn merge_only_reads_all_chunks() {
    let cfg = RiskConfig::default_test();
    let source = Arc::new(population(23, 25));
    let chunks = Arc::new(FsChunkStore::new(temp_dir("merge-only")).unwrap());
    let orch = BatchOrchestrator::new(source, None, chunks.clone(), cfg.clone());
    orch.run_map(None).unwrap();

    let scores = run_merge(&*chunks, None, &cfg, None).unwrap();
    assert_eq!(scores.len(), 25);
}

/// Merging an empty chunk directory yields no scores and no error.
#[test]
fn merge_empty_store() {
    let cfg = RiskConfig::default_test();
    let chunks = FsChunkStore::new(temp_dir("empty")).unwrap();
    let scores = run_merge(&chunks, None, &cfg, None).unwrap();
    assert!(scores.is_empty());
    assert!(chunks.list_chunks().unwrap().is_empty());
}
