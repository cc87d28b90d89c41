//! Weighted fair-share ranking
//!
//! A candidate's deviation is `current/total_units - weight/total_weight`.
//! Candidates are ranked by deviation ascending, so the most under-served
//! candidate relative to its weight comes first. Comparison is done on the
//! integer key `current * total_weight - weight * total_units`, which orders
//! exactly like the deviation without floating point rounding.

use crate::Result;
use std::cmp::Ordering;
use tenantry_core::{PoolHandle, TenantryError};
use tracing::debug;

/// Something that can be ranked by fair-share deviation
pub trait RankCandidate {
    /// Relative capacity weight; zero excludes the candidate
    fn weight(&self) -> i64;

    /// Units currently assigned
    fn current_units(&self) -> i64;

    /// Ceiling on units (`None` = unbounded)
    fn max_units(&self) -> Option<i64>;

    /// Reject malformed input before ranking
    fn validate(&self) -> Result<()>;

    /// Deterministic order between candidates with equal deviation
    fn tie_break(&self, other: &Self) -> Ordering;

    fn is_full(&self) -> bool {
        self.max_units()
            .is_some_and(|max| self.current_units() >= max)
    }
}

impl RankCandidate for PoolHandle {
    fn weight(&self) -> i64 {
        self.weight
    }

    fn current_units(&self) -> i64 {
        self.current_units
    }

    fn max_units(&self) -> Option<i64> {
        self.max_units
    }

    fn validate(&self) -> Result<()> {
        Ok(PoolHandle::validate(self)?)
    }

    fn tie_break(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// A schema ranked like a pool with uniform weight 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCandidate {
    pub name: String,
    pub current_units: i64,
    pub max_units_per_schema: i64,
}

impl RankCandidate for SchemaCandidate {
    fn weight(&self) -> i64 {
        1
    }

    fn current_units(&self) -> i64 {
        self.current_units
    }

    fn max_units(&self) -> Option<i64> {
        Some(self.max_units_per_schema)
    }

    fn validate(&self) -> Result<()> {
        if self.current_units < 0 || self.max_units_per_schema <= 0 {
            return Err(TenantryError::validation_failed(
                format!("schema {}", self.name),
                format!(
                    "invalid load {}/{}",
                    self.current_units, self.max_units_per_schema
                ),
                "Schema counts must be non-negative and the cap positive",
            )
            .into());
        }
        Ok(())
    }

    /// Generated names order by stem, then by sequence number
    fn tie_break(&self, other: &Self) -> Ordering {
        sequence_key(&self.name)
            .cmp(&sequence_key(&other.name))
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Split `prefix_pool_seq` into its stem and numeric suffix
fn sequence_key(name: &str) -> (&str, Option<u64>) {
    match name.rsplit_once('_') {
        Some((stem, seq)) if !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) => {
            (stem, seq.parse().ok())
        }
        _ => (name, None),
    }
}

/// Cluster totals one ranking is computed against
///
/// Computed once per snapshot so several rankings can share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RankTotals {
    pub total_units: i64,
    pub total_weight: i64,
}

impl RankTotals {
    pub fn new(total_units: i64, total_weight: i64) -> Self {
        Self {
            total_units,
            total_weight,
        }
    }

    /// Sum units and weights over a candidate set
    pub fn from_candidates<C: RankCandidate>(candidates: &[C]) -> Self {
        candidates.iter().fold(Self::default(), |totals, c| Self {
            total_units: totals.total_units.saturating_add(c.current_units()),
            total_weight: totals.total_weight.saturating_add(c.weight()),
        })
    }

    fn validate(&self, has_candidates: bool) -> Result<()> {
        if self.total_units < 0 || self.total_weight < 0 {
            return Err(TenantryError::validation_failed(
                "ranking totals",
                format!(
                    "totals must be non-negative (units {}, weight {})",
                    self.total_units, self.total_weight
                ),
                "Recompute the totals from the candidate snapshot",
            )
            .into());
        }

        if has_candidates && self.total_weight == 0 {
            return Err(TenantryError::validation_failed(
                "ranking totals",
                "total weight is zero but weighted candidates exist",
                "Recompute the totals from the candidate snapshot",
            )
            .into());
        }

        Ok(())
    }

    /// Integer key ordered like the fair-share deviation
    pub fn deviation_key<C: RankCandidate>(&self, candidate: &C) -> i128 {
        let weight = candidate.weight() as i128;
        if self.total_units == 0 {
            // actual share is 0, so deviation is -weight/total_weight
            return -weight;
        }
        candidate.current_units() as i128 * self.total_weight as i128
            - weight * self.total_units as i128
    }

    /// Fair-share deviation as a float, for diagnostics
    pub fn deviation<C: RankCandidate>(&self, candidate: &C) -> f64 {
        let fair_share = if self.total_weight > 0 {
            candidate.weight() as f64 / self.total_weight as f64
        } else {
            0.0
        };
        let actual_share = if self.total_units > 0 {
            candidate.current_units() as f64 / self.total_units as f64
        } else {
            0.0
        };
        actual_share - fair_share
    }

    /// Compare two candidates: lower deviation first, then tie-break
    pub fn compare<C: RankCandidate>(&self, a: &C, b: &C) -> Ordering {
        self.deviation_key(a)
            .cmp(&self.deviation_key(b))
            .then_with(|| a.tie_break(b))
    }
}

/// Rank candidates by fair-share deviation, most preferred first
///
/// Every candidate is validated first; one malformed candidate fails the
/// whole ranking. Candidates with zero weight or at their ceiling are left
/// out. An empty result is a valid outcome.
pub fn rank_candidates<C: RankCandidate + Clone>(
    candidates: &[C],
    totals: RankTotals,
) -> Result<Vec<C>> {
    for candidate in candidates {
        candidate.validate()?;
    }

    let mut eligible: Vec<C> = candidates
        .iter()
        .filter(|c| c.weight() > 0 && !c.is_full())
        .cloned()
        .collect();

    totals.validate(!eligible.is_empty())?;

    eligible.sort_by(|a, b| totals.compare(a, b));
    Ok(eligible)
}

/// Weighted fair-share ranker for database pools
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedPoolRanker;

impl WeightedPoolRanker {
    pub fn new() -> Self {
        Self
    }

    /// Order pools by how much each deserves the next assignment
    pub fn rank(
        &self,
        pools: &[PoolHandle],
        total_units: i64,
        total_weight: i64,
    ) -> Result<Vec<PoolHandle>> {
        let totals = RankTotals::new(total_units, total_weight);
        let ranked = rank_candidates(pools, totals)?;

        for pool in &ranked {
            debug!(
                "Pool {} deviation {:.6} (weight {}, units {})",
                pool.id,
                totals.deviation(pool),
                pool.weight,
                pool.current_units
            );
        }

        Ok(ranked)
    }

    /// Rank using totals computed from the pools themselves
    pub fn rank_snapshot(&self, pools: &[PoolHandle]) -> Result<Vec<PoolHandle>> {
        let totals = RankTotals::from_candidates(pools);
        self.rank(pools, totals.total_units, totals.total_weight)
    }

    /// Name of the ranking policy
    pub fn name(&self) -> &str {
        "WeightedFairShare"
    }
}

impl std::fmt::Display for WeightedPoolRanker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
