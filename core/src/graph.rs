//! Ownership graph traversal.
//!
//! The corporate-entity graph is an external store; the engine consumes
//! it through `OwnershipGraph`, whose contract is ONE bulk query per
//! batch of (npi, display name) pairs. Per-provider round trips are the
//! dominant cost at population scale, so implementations must not fan
//! out internally.
//!
//! Resolution per provider:
//!   1. Match a facility entity by case-insensitive substring containment
//!      of the provider's display name (first match in name order).
//!   2. Walk ownership edges upward up to 5 hops to collect ancestors.
//!   3. Walk back downward up to 5 hops from every chain entity, pulling
//!      in all facilities under common ultimate ownership.
//!   4. Associate providers to chain entities by name containment and
//!      count how many are linked to an exclusion record.
//!
//! Name containment can over-match on common fragments; that imprecision
//! is a known property of the upstream data, not something this layer
//! second-guesses.

use crate::error::RiskResult;
use crate::model::OwnershipChainResult;
use crate::types::Npi;
use std::collections::{HashMap, HashSet};

/// Maximum hops in each direction of the up-then-down traversal.
pub const MAX_HOPS: usize = 5;

pub trait OwnershipGraph: Send + Sync {
    /// Resolve chain aggregates for an entire batch in a single query.
    ///
    /// Providers absent from the result map are treated as zero-risk by
    /// the caller. An `Err` degrades the whole batch to zero-risk — it
    /// must never abort the batch.
    fn resolve_chains(
        &self,
        batch: &[(Npi, String)],
    ) -> RiskResult<HashMap<Npi, OwnershipChainResult>>;
}

/// Degraded no-op mode: resolves every batch to the empty result.
pub struct NoopGraph;

impl OwnershipGraph for NoopGraph {
    fn resolve_chains(
        &self,
        _batch: &[(Npi, String)],
    ) -> RiskResult<HashMap<Npi, OwnershipChainResult>> {
        Ok(HashMap::new())
    }
}

struct Entity {
    name_lower: String,
    is_facility: bool,
    excluded: bool,
}

struct GraphProvider {
    name_lower: String,
    excluded: bool,
}

/// In-memory corporate-entity graph with OWNS edges and exclusion links.
pub struct InMemoryOwnershipGraph {
    entities: Vec<Entity>,
    /// Entity indices ordered by name, for deterministic first-match.
    facility_order: Vec<usize>,
    owners_of: Vec<Vec<usize>>,
    owned_by: Vec<Vec<usize>>,
    providers: Vec<GraphProvider>,
}

impl InMemoryOwnershipGraph {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            facility_order: Vec::new(),
            owners_of: Vec::new(),
            owned_by: Vec::new(),
            providers: Vec::new(),
        }
    }

    /// Add a corporate entity; facilities are candidates for provider
    /// name resolution. Returns the entity's handle.
    pub fn add_entity(&mut self, name: &str, is_facility: bool, excluded: bool) -> usize {
        let idx = self.entities.len();
        self.entities.push(Entity {
            name_lower: name.to_lowercase(),
            is_facility,
            excluded,
        });
        self.owners_of.push(Vec::new());
        self.owned_by.push(Vec::new());
        if is_facility {
            self.facility_order.push(idx);
            let entities = &self.entities;
            self.facility_order
                .sort_by(|&a, &b| entities[a].name_lower.cmp(&entities[b].name_lower));
        }
        idx
    }

    /// Record `owner` OWNS `owned`.
    pub fn add_ownership(&mut self, owner: usize, owned: usize) {
        self.owners_of[owned].push(owner);
        self.owned_by[owner].push(owned);
    }

    pub fn add_provider(&mut self, name: &str, excluded: bool) {
        self.providers.push(GraphProvider {
            name_lower: name.to_lowercase(),
            excluded,
        });
    }

    fn resolve_one(&self, display_name: &str) -> OwnershipChainResult {
        let needle = display_name.to_lowercase();
        if needle.is_empty() {
            return OwnershipChainResult::default();
        }

        let facility = self
            .facility_order
            .iter()
            .copied()
            .find(|&i| self.entities[i].is_facility && self.entities[i].name_lower.contains(&needle));
        let facility = match facility {
            Some(f) => f,
            None => return OwnershipChainResult::default(),
        };

        // Upward: ancestors within MAX_HOPS.
        let mut chain: HashSet<usize> = HashSet::new();
        chain.insert(facility);
        let mut frontier = vec![facility];
        for _ in 0..MAX_HOPS {
            let mut next = Vec::new();
            for &e in &frontier {
                for &owner in &self.owners_of[e] {
                    if chain.insert(owner) {
                        next.push(owner);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        // Downward from every chain entity: siblings under common owners.
        let mut all_entities = chain.clone();
        for &start in &chain {
            let mut frontier = vec![start];
            for _ in 0..MAX_HOPS {
                let mut next = Vec::new();
                for &e in &frontier {
                    for &owned in &self.owned_by[e] {
                        if all_entities.insert(owned) {
                            next.push(owned);
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
        }

        let owner_excluded = all_entities.iter().any(|&e| self.entities[e].excluded);

        // Providers associated with any chain entity by name containment.
        let mut chain_providers: HashSet<usize> = HashSet::new();
        for &e in &all_entities {
            let ename = &self.entities[e].name_lower;
            if ename.is_empty() {
                continue;
            }
            for (pi, p) in self.providers.iter().enumerate() {
                if p.name_lower.contains(ename) {
                    chain_providers.insert(pi);
                }
            }
        }
        let chain_excluded_count = chain_providers
            .iter()
            .filter(|&&pi| self.providers[pi].excluded)
            .count() as u32;

        OwnershipChainResult {
            chain_provider_count: chain_providers.len() as u32,
            chain_excluded_count,
            owner_excluded,
        }
    }
}

impl Default for InMemoryOwnershipGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipGraph for InMemoryOwnershipGraph {
    fn resolve_chains(
        &self,
        batch: &[(Npi, String)],
    ) -> RiskResult<HashMap<Npi, OwnershipChainResult>> {
        Ok(batch
            .iter()
            .map(|(npi, name)| (npi.clone(), self.resolve_one(name)))
            .collect())
    }
}
