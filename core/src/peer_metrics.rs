//! Peer metrics engine.
//!
//! Aggregates payment records to (provider, year), derives the three
//! log-transformed billing-intensity metrics, and attaches robust z-scores
//! against the provider's peer group:
//!
//!   m1 = payments / max(claims, 1)
//!   m2 = claims / max(beneficiaries, 1)
//!   m3 = total payments
//!
//! The primary peer group is (taxonomy-prefix, state, year); when it has
//! fewer than `peer_min_size` eligible members its statistics are replaced
//! by the (taxonomy-prefix, year) fallback group for every member. A
//! provider-year needs `peer_min_claims` claims to count as a peer, so
//! low-volume rows never dominate the median/MAD.
//!
//! All reductions are group-by-key over columns, not per-row rescans.

use crate::config::RiskConfig;
use crate::model::{PaymentRecord, PeerMetricsRow};
use crate::stats;
use crate::types::{Npi, Year};
use std::collections::HashMap;

/// One (provider, year) aggregate before peer stats are attached.
struct YearAgg {
    npi: Npi,
    year: Year,
    taxonomy_10: String,
    state: String,
    total_payments: f64,
    total_claims: f64,
    m1: f64,
    lm: [f64; 3],
}

/// Median/MAD per log metric plus eligible-member count for one group.
struct GroupStats {
    med: [f64; 3],
    mad: [f64; 3],
    count: usize,
}

pub fn compute_peer_metrics(payments: &[PaymentRecord], cfg: &RiskConfig) -> Vec<PeerMetricsRow> {
    if payments.is_empty() {
        return Vec::new();
    }

    // ── Aggregate across programs per (npi, year, taxonomy, state) ──────
    let mut sums: HashMap<(Npi, Year, String, String), (f64, f64, f64)> = HashMap::new();
    for p in payments {
        let entry = sums
            .entry((p.npi.clone(), p.year, p.taxonomy.clone(), p.state.clone()))
            .or_insert((0.0, 0.0, 0.0));
        entry.0 += p.payments;
        entry.1 += p.claims;
        entry.2 += p.beneficiaries;
    }

    let mut rows: Vec<YearAgg> = sums
        .into_iter()
        .map(|((npi, year, taxonomy, state), (pay, claims, benes))| {
            // Refund-heavy rows can aggregate negative; floor them so the
            // log transform stays finite.
            let (pay, claims, benes) = (pay.max(0.0), claims.max(0.0), benes.max(0.0));
            let m1 = pay / claims.max(1.0);
            let m2 = claims / benes.max(1.0);
            let m3 = pay;
            YearAgg {
                npi,
                year,
                taxonomy_10: taxonomy.chars().take(10).collect(),
                state,
                total_payments: pay,
                total_claims: claims,
                m1,
                lm: [
                    (m1 + cfg.epsilon).ln(),
                    (m2 + cfg.epsilon).ln(),
                    (m3 + cfg.epsilon).ln(),
                ],
            }
        })
        .collect();
    rows.sort_by(|a, b| (&a.npi, a.year, &a.state).cmp(&(&b.npi, b.year, &b.state)));

    // ── Group eligible peers by primary and fallback keys ───────────────
    let eligible: Vec<usize> = (0..rows.len())
        .filter(|&i| rows[i].total_claims >= cfg.peer_min_claims)
        .collect();

    let mut primary_members: HashMap<(String, String, Year), Vec<usize>> = HashMap::new();
    let mut fallback_members: HashMap<(String, Year), Vec<usize>> = HashMap::new();
    for &i in &eligible {
        let r = &rows[i];
        primary_members
            .entry((r.taxonomy_10.clone(), r.state.clone(), r.year))
            .or_default()
            .push(i);
        fallback_members
            .entry((r.taxonomy_10.clone(), r.year))
            .or_default()
            .push(i);
    }

    let group_stats = |members: &[usize]| -> GroupStats {
        let mut med = [0.0; 3];
        let mut mad = [0.0; 3];
        for k in 0..3 {
            let col: Vec<f64> = members.iter().map(|&i| rows[i].lm[k]).collect();
            let (m, d) = stats::median_and_mad(&col);
            med[k] = m;
            mad[k] = d;
        }
        GroupStats {
            med,
            mad,
            count: members.len(),
        }
    };

    let primary_stats: HashMap<_, GroupStats> = primary_members
        .iter()
        .map(|(k, v)| (k.clone(), group_stats(v)))
        .collect();
    let fallback_stats: HashMap<_, GroupStats> = fallback_members
        .iter()
        .map(|(k, v)| (k.clone(), group_stats(v)))
        .collect();

    // ── Percentile rank of m1 among eligible peers, per group ───────────
    let rank_within = |members: &[usize]| -> Vec<(usize, f64)> {
        let col: Vec<f64> = members.iter().map(|&i| rows[i].m1).collect();
        let ranks = stats::average_ranks(&col);
        members.iter().copied().zip(ranks).collect()
    };

    let mut primary_rank: HashMap<usize, (f64, usize)> = HashMap::new();
    for members in primary_members.values() {
        let n = members.len();
        for (i, rank) in rank_within(members) {
            primary_rank.insert(i, (rank, n));
        }
    }
    let mut fallback_rank: HashMap<usize, (f64, usize)> = HashMap::new();
    for members in fallback_members.values() {
        let n = members.len();
        for (i, rank) in rank_within(members) {
            fallback_rank.insert(i, (rank, n));
        }
    }

    // ── Attach z-scores and ranks to every aggregate row ────────────────
    rows.iter()
        .enumerate()
        .map(|(i, r)| {
            let pkey = (r.taxonomy_10.clone(), r.state.clone(), r.year);
            let fkey = (r.taxonomy_10.clone(), r.year);
            let primary = primary_stats.get(&pkey);
            let use_primary = primary.map(|s| s.count >= cfg.peer_min_size).unwrap_or(false);
            let chosen = if use_primary {
                primary
            } else {
                fallback_stats.get(&fkey)
            };

            let peer_count = chosen.map(|s| s.count).unwrap_or(0);
            let mut z = [0.0; 3];
            if let Some(s) = chosen {
                for k in 0..3 {
                    z[k] = stats::robust_z_from_stats(r.lm[k], s.med[k], s.mad[k], cfg.mad_scale);
                }
            }

            let pct = match primary_rank.get(&i) {
                Some(&(rank, n)) if n >= cfg.peer_min_size => pct_rank(rank, n),
                _ => match fallback_rank.get(&i) {
                    Some(&(rank, n)) => pct_rank(rank, n),
                    // Ineligible rows carry no rank; default to the middle.
                    None => 0.5,
                },
            };

            PeerMetricsRow {
                npi: r.npi.clone(),
                year: r.year,
                taxonomy_10: r.taxonomy_10.clone(),
                state: r.state.clone(),
                peer_count,
                m1: r.m1,
                m1_pct_rank: stats::round2(pct * 100.0),
                z_lm1: z[0],
                z_lm2: z[1],
                z_lm3: z[2],
                total_payments: r.total_payments,
                total_claims: r.total_claims,
            }
        })
        .collect()
}

/// `(rank - 1) / (n - 1)`, defaulting to 0.5 when the rank is undefined.
fn pct_rank(rank: f64, n: usize) -> f64 {
    if n <= 1 {
        0.5
    } else {
        (rank - 1.0) / (n as f64 - 1.0)
    }
}
