//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! The merge pass and the runner call store methods — they never execute
//! SQL directly.

use crate::error::RiskResult;
use crate::model::{RiskLabel, RiskScore};
use crate::types::Npi;
use rusqlite::{params, Connection, OptionalExtension};

pub struct RiskStore {
    conn: Connection,
}

/// A persisted score row read back without the JSON blobs.
#[derive(Debug, Clone)]
pub struct StoredScore {
    pub npi: Npi,
    pub risk_score: f64,
    pub risk_label: String,
    pub r_raw: f64,
    pub updated_at: String,
}

impl RiskStore {
    /// Open (or create) the score database at `path`.
    pub fn open(path: &str) -> RiskResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RiskResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> RiskResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_risk_scores.sql"))?;
        Ok(())
    }

    // ── Scores ─────────────────────────────────────────────────

    /// Upsert one merge pass worth of scores, keyed by npi. Re-running
    /// the same merge replaces rows with identical values.
    pub fn upsert_scores(&self, scores: &[RiskScore]) -> RiskResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO provider_risk_scores (
                     npi, risk_score, risk_label, r_raw,
                     billing_outlier_score, billing_outlier_percentile,
                     ownership_chain_risk, payment_trajectory_score,
                     payment_trajectory_zscore, exclusion_proximity_score,
                     program_concentration_score, chain_excluded_count,
                     peer_taxonomy, peer_state, peer_count,
                     data_window_years, flags, components, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                           ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                 ON CONFLICT(npi) DO UPDATE SET
                     risk_score = excluded.risk_score,
                     risk_label = excluded.risk_label,
                     r_raw = excluded.r_raw,
                     billing_outlier_score = excluded.billing_outlier_score,
                     billing_outlier_percentile = excluded.billing_outlier_percentile,
                     ownership_chain_risk = excluded.ownership_chain_risk,
                     payment_trajectory_score = excluded.payment_trajectory_score,
                     payment_trajectory_zscore = excluded.payment_trajectory_zscore,
                     exclusion_proximity_score = excluded.exclusion_proximity_score,
                     program_concentration_score = excluded.program_concentration_score,
                     chain_excluded_count = excluded.chain_excluded_count,
                     peer_taxonomy = excluded.peer_taxonomy,
                     peer_state = excluded.peer_state,
                     peer_count = excluded.peer_count,
                     data_window_years = excluded.data_window_years,
                     flags = excluded.flags,
                     components = excluded.components,
                     updated_at = excluded.updated_at",
            )?;
            for s in scores {
                let c = &s.components;
                stmt.execute(params![
                    s.npi,
                    s.risk_score,
                    s.risk_label.as_str(),
                    s.r_raw,
                    c.billing_outlier_score,
                    c.billing_outlier_percentile,
                    c.ownership_chain_risk,
                    c.payment_trajectory_score,
                    c.payment_trajectory_zscore,
                    c.exclusion_proximity_score,
                    c.program_concentration_score,
                    c.chain_excluded_count as i64,
                    c.peer_taxonomy,
                    c.peer_state,
                    c.peer_count as i64,
                    serde_json::to_string(&c.data_window_years)?,
                    serde_json::to_string(&s.flags)?,
                    serde_json::to_string(c)?,
                    s.updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_score(&self, npi: &str) -> RiskResult<Option<StoredScore>> {
        let result = self
            .conn
            .query_row(
                "SELECT npi, risk_score, risk_label, r_raw, updated_at
                 FROM provider_risk_scores WHERE npi = ?1",
                params![npi],
                |row| {
                    Ok(StoredScore {
                        npi: row.get(0)?,
                        risk_score: row.get(1)?,
                        risk_label: row.get(2)?,
                        r_raw: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    pub fn score_count(&self) -> RiskResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM provider_risk_scores", [], |row| {
                row.get(0)
            })?;
        Ok(n as usize)
    }

    /// Highest-scoring providers, for run summaries.
    pub fn top_scores(&self, limit: usize) -> RiskResult<Vec<StoredScore>> {
        let mut stmt = self.conn.prepare(
            "SELECT npi, risk_score, risk_label, r_raw, updated_at
             FROM provider_risk_scores
             ORDER BY risk_score DESC, npi ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(StoredScore {
                    npi: row.get(0)?,
                    risk_score: row.get(1)?,
                    risk_label: row.get(2)?,
                    r_raw: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count per label, for run summaries.
    pub fn label_counts(&self) -> RiskResult<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT risk_label, COUNT(*) FROM provider_risk_scores
             GROUP BY risk_label ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// RiskLabel round-trips through its string form in the database.
impl std::str::FromStr for RiskLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(RiskLabel::Low),
            "Moderate" => Ok(RiskLabel::Moderate),
            "Elevated" => Ok(RiskLabel::Elevated),
            "High" => Ok(RiskLabel::High),
            other => Err(format!("unknown risk label: {other}")),
        }
    }
}
