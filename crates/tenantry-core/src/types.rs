use crate::{Result, TenantryError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a database pool, unique within the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub i32);

impl PoolId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for PoolId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Identity, weight and current load of one database pool
///
/// Counts are signed so that rows read from a catalog can be checked with
/// [`PoolHandle::validate`] instead of being silently clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHandle {
    /// Pool identifier
    pub id: PoolId,
    /// Administrator-assigned relative capacity weight
    pub weight: i64,
    /// Number of tenants currently assigned to this pool
    pub current_units: i64,
    /// Hard ceiling on `current_units` (`None` = unbounded)
    pub max_units: Option<i64>,
}

impl PoolHandle {
    /// Create a bounded pool handle
    pub fn new(id: impl Into<PoolId>, weight: i64, current_units: i64, max_units: i64) -> Self {
        Self {
            id: id.into(),
            weight,
            current_units,
            max_units: Some(max_units),
        }
    }

    /// Create a pool handle without a tenant ceiling
    pub fn unbounded(id: impl Into<PoolId>, weight: i64, current_units: i64) -> Self {
        Self {
            id: id.into(),
            weight,
            current_units,
            max_units: None,
        }
    }

    /// Reject negative weights or counts and counts above the ceiling
    pub fn validate(&self) -> Result<()> {
        let subject = format!("pool {}", self.id);

        if self.weight < 0 {
            return Err(TenantryError::validation_failed(
                subject,
                format!("weight is negative ({})", self.weight),
                "Pool weights must be zero (disabled) or positive",
            ));
        }

        if self.current_units < 0 {
            return Err(TenantryError::validation_failed(
                subject,
                format!("current units is negative ({})", self.current_units),
                "Recount the tenants assigned to this pool",
            ));
        }

        if let Some(max) = self.max_units {
            if max <= 0 {
                return Err(TenantryError::validation_failed(
                    subject,
                    format!("max units must be positive, got {}", max),
                    "Use a positive ceiling, or leave it unset for an unbounded pool",
                ));
            }

            if self.current_units > max {
                return Err(TenantryError::validation_failed(
                    subject,
                    format!(
                        "current units {} exceed max units {}",
                        self.current_units, max
                    ),
                    "Raise the pool ceiling or move tenants off the pool",
                ));
            }
        }

        Ok(())
    }

    /// Whether the pool has reached its ceiling
    pub fn is_full(&self) -> bool {
        self.max_units
            .is_some_and(|max| self.current_units >= max)
    }

    /// Remaining room before the ceiling (`None` = unbounded)
    pub fn remaining(&self) -> Option<i64> {
        self.max_units
            .map(|max| (max - self.current_units).max(0))
    }

    /// Whether `batch` more tenants fit under the ceiling
    pub fn has_room_for(&self, batch: i64) -> bool {
        self.remaining().is_none_or(|room| room >= batch)
    }
}

impl fmt::Display for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_units {
            Some(max) => write!(
                f,
                "pool {} (weight {}, {}/{})",
                self.id, self.weight, self.current_units, max
            ),
            None => write!(
                f,
                "pool {} (weight {}, {}/unbounded)",
                self.id, self.weight, self.current_units
            ),
        }
    }
}
