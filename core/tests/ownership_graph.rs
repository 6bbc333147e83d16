//! Ownership graph traversal, chain risk, and exclusion proximity tests.

use claidex_core::error::{RiskError, RiskResult};
use claidex_core::exclusion::compute_exclusion_proximity;
use claidex_core::graph::{InMemoryOwnershipGraph, NoopGraph, OwnershipGraph};
use claidex_core::model::{ExclusionRecord, OwnershipChainResult, Provider};
use claidex_core::ownership::{chain_risk_score, resolve_ownership_risk};
use std::collections::HashMap;

/// Parent holding with two facilities and three associated providers,
/// two of which carry exclusions.
fn tainted_graph() -> InMemoryOwnershipGraph {
    let mut g = InMemoryOwnershipGraph::new();
    let parent = g.add_entity("Acme Health Holdings", false, false);
    let north = g.add_entity("Acme Clinic North", true, false);
    let south = g.add_entity("Acme Clinic South", true, false);
    g.add_ownership(parent, north);
    g.add_ownership(parent, south);
    g.add_provider("Acme Clinic North Suite 1", false);
    g.add_provider("Acme Clinic North Suite 2", true);
    g.add_provider("Acme Clinic South Suite 1", true);
    g
}

fn provider(npi: &str, name: &str) -> Provider {
    Provider {
        npi: npi.to_string(),
        display_name: name.to_string(),
        taxonomy: "207R00000X".to_string(),
        state: "CA".to_string(),
        is_excluded: false,
    }
}

/// The up-then-down traversal pulls in sibling facilities under the
/// common parent, and counts excluded providers across the whole chain.
#[test]
fn traversal_reaches_sibling_facilities() {
    let g = tainted_graph();
    let batch = vec![("1".to_string(), "Acme Clinic North".to_string())];
    let chains = g.resolve_chains(&batch).unwrap();
    let c = &chains["1"];
    assert_eq!(c.chain_provider_count, 3);
    assert_eq!(c.chain_excluded_count, 2);
    assert!(!c.owner_excluded);
}

#[test]
fn excluded_parent_marks_owner_excluded() {
    let mut g = InMemoryOwnershipGraph::new();
    let parent = g.add_entity("Shady Holdings", false, true);
    let clinic = g.add_entity("Shady Clinic", true, false);
    g.add_ownership(parent, clinic);
    g.add_provider("Shady Clinic Office", false);

    let batch = vec![("1".to_string(), "Shady Clinic".to_string())];
    let c = &g.resolve_chains(&batch).unwrap()["1"];
    assert!(c.owner_excluded);
}

/// Providers whose names match no facility resolve to an empty chain,
/// as do providers with no display name at all.
#[test]
fn unmatched_or_blank_names_resolve_empty() {
    let g = tainted_graph();
    let batch = vec![
        ("1".to_string(), "Totally Unrelated Practice".to_string()),
        ("2".to_string(), String::new()),
    ];
    let chains = g.resolve_chains(&batch).unwrap();
    for npi in ["1", "2"] {
        let c = &chains[npi];
        assert_eq!(c.chain_provider_count, 0);
        assert_eq!(c.chain_excluded_count, 0);
        assert!(!c.owner_excluded);
    }
}

#[test]
fn chain_risk_is_excluded_fraction() {
    let risk = chain_risk_score(&OwnershipChainResult {
        chain_provider_count: 3,
        chain_excluded_count: 2,
        owner_excluded: false,
    });
    assert_eq!(risk, 66.67);

    // An empty chain never divides by zero.
    let risk = chain_risk_score(&OwnershipChainResult::default());
    assert_eq!(risk, 0.0);
}

struct FailingGraph;

impl OwnershipGraph for FailingGraph {
    fn resolve_chains(
        &self,
        _batch: &[(String, String)],
    ) -> RiskResult<HashMap<String, OwnershipChainResult>> {
        Err(RiskError::GraphUnavailable {
            reason: "connection refused".to_string(),
        })
    }
}

/// A graph outage degrades the whole batch to zero ownership risk
/// instead of failing it.
#[test]
fn graph_failure_degrades_to_zero() {
    let npis = vec!["1".to_string(), "2".to_string()];
    let providers = vec![provider("1", "Acme Clinic North"), provider("2", "Other")];
    let risks = resolve_ownership_risk(Some(&FailingGraph), &npis, &providers);
    assert_eq!(risks.len(), 2);
    for r in risks.values() {
        assert_eq!(r.chain_risk, 0.0);
        assert_eq!(r.chain_excluded_count, 0);
        assert!(!r.owner_excluded);
    }
}

#[test]
fn missing_graph_behaves_like_noop() {
    let npis = vec!["1".to_string()];
    let providers = vec![provider("1", "Acme Clinic North")];
    let none = resolve_ownership_risk(None, &npis, &providers);
    let noop = resolve_ownership_risk(Some(&NoopGraph), &npis, &providers);
    assert_eq!(none["1"].chain_risk, noop["1"].chain_risk);
    assert_eq!(none["1"].chain_risk, 0.0);
}

// ── Exclusion proximity tiers ────────────────────────────────────────────────

#[test]
fn exclusion_proximity_tiers() {
    let npis: Vec<String> = (1..=4).map(|i| i.to_string()).collect();
    let exclusions = vec![
        ExclusionRecord {
            npi: "1".to_string(),
            excl_date: "2022-01-01".to_string(),
            reinstated: false,
        },
        // Reinstated: no longer a direct exclusion.
        ExclusionRecord {
            npi: "2".to_string(),
            excl_date: "2019-05-01".to_string(),
            reinstated: true,
        },
    ];

    let mut ownership = HashMap::new();
    ownership.insert(
        "2".to_string(),
        claidex_core::ownership::OwnershipRisk {
            chain_risk: 40.0,
            chain_excluded_count: 1,
            owner_excluded: true,
        },
    );
    ownership.insert(
        "3".to_string(),
        claidex_core::ownership::OwnershipRisk {
            chain_risk: 20.0,
            chain_excluded_count: 2,
            owner_excluded: false,
        },
    );

    let prox = compute_exclusion_proximity(&exclusions, &npis, &ownership);
    assert_eq!(prox["1"], 100.0, "active direct exclusion");
    assert_eq!(prox["2"], 80.0, "reinstated but owner excluded");
    assert_eq!(prox["3"], 50.0, "excluded providers in chain");
    assert_eq!(prox["4"], 0.0, "clean provider");
}

/// Direct exclusion outranks every lower tier.
#[test]
fn direct_exclusion_dominates() {
    let npis = vec!["1".to_string()];
    let exclusions = vec![ExclusionRecord {
        npi: "1".to_string(),
        excl_date: "2022-01-01".to_string(),
        reinstated: false,
    }];
    let mut ownership = HashMap::new();
    ownership.insert(
        "1".to_string(),
        claidex_core::ownership::OwnershipRisk {
            chain_risk: 90.0,
            chain_excluded_count: 5,
            owner_excluded: true,
        },
    );
    let prox = compute_exclusion_proximity(&exclusions, &npis, &ownership);
    assert_eq!(prox["1"], 100.0);
}
