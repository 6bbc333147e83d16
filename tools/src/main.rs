//! risk-runner: headless batch runner for the Claidex risk scoring engine.
//!
//! Usage:
//!   risk-runner --seed 42 --providers 500 --db risk.db --chunk-dir ./chunks
//!   risk-runner --data-dir ./data --db risk.db --chunk-dir ./chunks
//!   risk-runner --merge-only --chunk-dir ./chunks --db risk.db

use anyhow::Result;
use claidex_core::chunk_store::FsChunkStore;
use claidex_core::config::RiskConfig;
use claidex_core::graph::{InMemoryOwnershipGraph, NoopGraph, OwnershipGraph};
use claidex_core::merge;
use claidex_core::model::{ExclusionRecord, PaymentRecord, Provider, RiskScore};
use claidex_core::orchestrator::{BatchOrchestrator, BatchState, RunSummary};
use claidex_core::source::{InMemorySource, TabularSource};
use claidex_core::store::RiskStore;
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::env;
use std::path::Path;
use std::sync::Arc;

const STATES: &[&str] = &["CA", "TX", "FL", "NY", "OH"];
const TAXONOMIES: &[&str] = &["207R00000X", "207Q00000X", "208D00000X", "363L00000X"];
const PROGRAMS: &[&str] = &["medicare", "medicaid", "open_payments"];

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let providers = parse_arg(&args, "--providers", 500usize);
    let batch_size = parse_arg(&args, "--batch-size", 0usize);
    let merge_only = args.iter().any(|a| a == "--merge-only");
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let db = str_arg(&args, "--db").unwrap_or("risk.db");
    let chunk_dir = str_arg(&args, "--chunk-dir").unwrap_or("./chunks");
    let data_dir = str_arg(&args, "--data-dir");
    let npi_filter = multi_arg(&args, "--npi");

    println!("Claidex — risk-runner");
    println!("  seed:       {seed}");
    println!("  db:         {db}");
    println!("  chunk_dir:  {chunk_dir}");
    println!("  data_dir:   {}", data_dir.unwrap_or("(synthetic)"));
    println!();

    let mut cfg = RiskConfig::default();
    if batch_size > 0 {
        cfg.batch.batch_size = batch_size;
    }
    cfg.validate()?;

    let store = RiskStore::open(db)?;
    store.migrate()?;
    let chunks = Arc::new(FsChunkStore::new(chunk_dir)?);

    if merge_only {
        // Merge whatever chunks a previous (possibly remote) map stage left.
        let scores = merge::run_merge(&*chunks, None, &cfg, Some(&store))?;
        println!("merged {} providers from existing chunks", scores.len());
        print_summary(&store)?;
        return Ok(());
    }

    let (source, graph): (Arc<dyn TabularSource>, Arc<dyn OwnershipGraph>) = match data_dir {
        Some(dir) => {
            // External graph stores are wired in deployment; file-backed
            // runs score in degraded ownership mode.
            log::info!("loading staged data from {dir}, ownership graph disabled");
            (
                Arc::new(InMemorySource::from_json_dir(Path::new(dir))?),
                Arc::new(NoopGraph),
            )
        }
        None => {
            let (source, graph) = build_synthetic(seed, providers);
            (Arc::new(source), Arc::new(graph))
        }
    };

    let subset: Option<Vec<String>> = if npi_filter.is_empty() {
        None
    } else {
        Some(npi_filter)
    };
    let chunks_dyn: Arc<dyn claidex_core::chunk_store::ChunkStore> = chunks.clone();
    let orchestrator = BatchOrchestrator::new(Arc::clone(&source), Some(graph), chunks_dyn, cfg.clone());

    let summary = orchestrator.run_map(subset.as_deref())?;
    print_map_summary(&summary);
    summary.ensure_complete()?;

    let expected = summary.chunk_batches();
    let sink = if dry_run { None } else { Some(&store) };
    let scores = merge::run_merge(&*chunks, Some(&expected), &cfg, sink)?;

    if dry_run {
        println!("dry run: {} providers scored, nothing persisted", scores.len());
        print_top(&scores, 10);
    } else {
        print_summary(&store)?;
    }
    Ok(())
}

// ── Synthetic population ─────────────────────────────────────────────────────

/// Deterministic synthetic population: a provider universe with five
/// years of per-program payments, a sprinkle of exclusions, and a small
/// ownership graph containing one tainted chain.
fn build_synthetic(seed: u64, n: usize) -> (InMemorySource, InMemoryOwnershipGraph) {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut providers = Vec::with_capacity(n);
    let mut payments = Vec::new();
    let mut exclusions = Vec::new();
    let mut graph = InMemoryOwnershipGraph::new();

    let parent = graph.add_entity("Sunrise Holdings", false, false);
    let tainted = graph.add_entity("Sunrise Clinic Group", true, true);
    graph.add_ownership(parent, tainted);

    for i in 0..n {
        let npi = format!("{:010}", 1_000_000_000u64 + i as u64);
        let state = STATES[rng.gen_range(0..STATES.len())];
        let taxonomy = TAXONOMIES[rng.gen_range(0..TAXONOMIES.len())];
        let in_chain = rng.gen_bool(0.02);
        let display_name = if in_chain {
            format!("Sunrise Clinic Group Office {i}")
        } else {
            format!("Provider {i} Medical Office")
        };
        let is_excluded = rng.gen_bool(0.01);
        if is_excluded {
            exclusions.push(ExclusionRecord {
                npi: npi.clone(),
                excl_date: "2023-06-01".to_string(),
                reinstated: rng.gen_bool(0.2),
            });
        }
        if in_chain {
            graph.add_provider(&display_name, is_excluded);
        }

        let base = rng.gen_range(50.0..400.0);
        let growth: f64 = rng.gen_range(0.95..1.35);
        for (yi, year) in (2021..=2025).enumerate() {
            for program in PROGRAMS.iter().take(rng.gen_range(1..=PROGRAMS.len())) {
                let claims = rng.gen_range(80.0..2000.0_f64).floor();
                payments.push(PaymentRecord {
                    npi: npi.clone(),
                    year,
                    program: program.to_string(),
                    payments: base * growth.powi(yi as i32) * claims * rng.gen_range(0.8..1.2),
                    claims,
                    beneficiaries: (claims * rng.gen_range(0.4..0.9)).floor(),
                    taxonomy: taxonomy.to_string(),
                    state: state.to_string(),
                });
            }
        }

        providers.push(Provider {
            npi,
            display_name,
            taxonomy: taxonomy.to_string(),
            state: state.to_string(),
            is_excluded,
        });
    }

    (
        InMemorySource::new(providers, payments, exclusions),
        graph,
    )
}

// ── Output ───────────────────────────────────────────────────────────────────

fn print_map_summary(summary: &RunSummary) {
    println!("=== MAP SUMMARY ===");
    println!("  run_id:      {}", summary.run_id);
    println!("  providers:   {}", summary.total_providers);
    println!("  batches:     {}", summary.batches.len());
    println!("  succeeded:   {}", summary.succeeded());
    println!("  failed:      {}", summary.failed());
    println!("  rows:        {}", summary.total_rows());
    for b in &summary.batches {
        if b.state == BatchState::Failed {
            println!(
                "  batch {} FAILED after {} attempt(s): {}",
                b.batch_index,
                b.attempts,
                b.error.as_deref().unwrap_or("unknown")
            );
        }
    }
    println!();
}

fn print_summary(store: &RiskStore) -> Result<()> {
    println!("=== SCORE SUMMARY ===");
    println!("  scored providers: {}", store.score_count()?);
    for (label, count) in store.label_counts()? {
        println!("  {label:>10}: {count}");
    }
    println!();
    println!("=== TOP PROVIDERS ===");
    for s in store.top_scores(10)? {
        println!("  {} | {:>6.2} | {}", s.npi, s.risk_score, s.risk_label);
    }
    Ok(())
}

fn print_top(scores: &[RiskScore], limit: usize) {
    let mut sorted: Vec<&RiskScore> = scores.iter().collect();
    sorted.sort_by(|a, b| {
        b.risk_score
            .partial_cmp(&a.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.npi.cmp(&b.npi))
    });
    println!("=== TOP PROVIDERS ===");
    for s in sorted.into_iter().take(limit) {
        println!(
            "  {} | {:>6.2} | {}",
            s.npi,
            s.risk_score,
            s.risk_label.as_str()
        );
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

/// Collect every value following `flag` up to the next `--` switch; the
/// flag may also be repeated.
fn multi_arg(args: &[String], flag: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            i += 1;
            while i < args.len() && !args[i].starts_with("--") {
                out.push(args[i].clone());
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    out
}
