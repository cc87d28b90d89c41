use serde::{Deserialize, Serialize};
use std::fmt;
use tenantry_core::{PoolHandle, PoolId};

/// A pool as seen at snapshot time, with its maintenance lock flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub handle: PoolHandle,
    /// Administrative lock ("maintenance in progress")
    pub locked: bool,
}

impl PoolState {
    pub fn new(handle: PoolHandle, locked: bool) -> Self {
        Self { handle, locked }
    }

    pub fn unlocked(handle: PoolHandle) -> Self {
        Self::new(handle, false)
    }
}

/// A pool and schema chosen for a batch of new tenants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub pool_id: PoolId,
    pub schema: String,
    /// Number of tenants the caller intends to create
    pub batch_size: i64,
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tenant(s) -> pool {} / {}", self.batch_size, self.pool_id, self.schema)
    }
}

/// Why no placement could be made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoCapacityReason {
    /// No pool with weight, room for the batch, and no lock
    NoEligiblePools,
    /// Every pool that would otherwise qualify is locked
    AllPoolsLocked,
    /// Eligible pools exist but every schema in them is full
    AllSchemasFull,
}

impl fmt::Display for NoCapacityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoCapacityReason::NoEligiblePools => "no eligible pools",
            NoCapacityReason::AllPoolsLocked => "all pools locked",
            NoCapacityReason::AllSchemasFull => "all schemas full",
        };
        write!(f, "{}", text)
    }
}

/// Outcome of an assignment request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Assigned(Assignment),
    /// Not an error: the caller should provision a schema or a pool
    NoCapacity {
        reason: NoCapacityReason,
        /// Best-ranked pool whose schemas were all full; where a new schema belongs
        candidate: Option<PoolId>,
    },
}

impl Placement {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            Placement::Assigned(assignment) => Some(assignment),
            Placement::NoCapacity { .. } => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Placement::Assigned(_))
    }
}

/// Result of running an eligibility filter on a pool
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub pool_id: PoolId,
    pub passed: bool,
    pub reason: Option<String>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(pool_id: PoolId) -> Self {
        Self {
            pool_id,
            passed: true,
            reason: None,
        }
    }

    /// Create a failing filter result
    pub fn fail(pool_id: PoolId, reason: String) -> Self {
        Self {
            pool_id,
            passed: false,
            reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_result() {
        let pass = FilterResult::pass(PoolId(1));
        assert!(pass.passed);
        assert!(pass.reason.is_none());

        let fail = FilterResult::fail(PoolId(2), "Pool is locked".to_string());
        assert!(!fail.passed);
        assert_eq!(fail.reason, Some("Pool is locked".to_string()));
    }

    #[test]
    fn test_placement_accessors() {
        let placement = Placement::Assigned(Assignment {
            pool_id: PoolId(3),
            schema: "tenantdb_3_1".to_string(),
            batch_size: 1,
        });
        assert!(placement.is_assigned());
        assert_eq!(placement.assignment().unwrap().schema, "tenantdb_3_1");

        let none = Placement::NoCapacity {
            reason: NoCapacityReason::AllSchemasFull,
            candidate: Some(PoolId(3)),
        };
        assert!(!none.is_assigned());
        assert!(none.assignment().is_none());
    }
}
