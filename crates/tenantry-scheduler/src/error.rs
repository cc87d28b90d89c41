// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use tenantry_core::PoolId;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The store rejected an insert because the schema or pool is full
    #[error("Capacity exceeded for schema {schema} in pool {pool_id}: {reason}")]
    #[diagnostic(
        code(scheduler::capacity_exceeded),
        help("Invalidate the cached schema for this pool and request a new assignment")
    )]
    CapacityExceeded {
        pool_id: PoolId,
        schema: String,
        reason: String,
    },

    /// The pool was locked when the insert reached the store
    #[error("Pool {pool_id} is locked")]
    #[diagnostic(
        code(scheduler::pool_locked),
        help("The pool is under maintenance; request a new assignment")
    )]
    PoolLocked {
        pool_id: PoolId,
    },

    /// Tenant id already present in the catalog
    #[error("Tenant {tenant_id} already exists")]
    #[diagnostic(
        code(scheduler::tenant_exists),
        help("Tenant ids are unique across the cluster")
    )]
    TenantExists {
        tenant_id: u64,
    },

    /// Tenant id not present in the catalog
    #[error("Tenant {tenant_id} not found")]
    #[diagnostic(code(scheduler::tenant_not_found))]
    TenantNotFound {
        tenant_id: u64,
    },

    /// Pool not registered
    #[error("Pool {pool_id} not found")]
    #[diagnostic(
        code(scheduler::pool_not_found),
        help("Register the pool before placing tenants on it")
    )]
    PoolNotFound {
        pool_id: PoolId,
    },

    /// Pool registered twice
    #[error("Pool {pool_id} is already registered")]
    #[diagnostic(
        code(scheduler::pool_already_registered),
        help("Use set_weight to change an existing pool")
    )]
    PoolAlreadyRegistered {
        pool_id: PoolId,
    },

    /// Schema not present in the pool
    #[error("Schema {schema} not found in pool {pool_id}")]
    #[diagnostic(
        code(scheduler::schema_not_found),
        help("The schema may have been removed; request a new assignment")
    )]
    SchemaNotFound {
        pool_id: PoolId,
        schema: String,
    },

    /// Schema still holds tenants
    #[error("Schema {schema} in pool {pool_id} still holds {tenants} tenant(s)")]
    #[diagnostic(
        code(scheduler::schema_in_use),
        help("Move or remove the tenants before dropping the schema")
    )]
    SchemaInUse {
        pool_id: PoolId,
        schema: String,
        tenants: i64,
    },

    /// A tenant could not be placed anywhere
    #[error("Provisioning failed for tenant {tenant_id}: {message}")]
    #[diagnostic(
        code(scheduler::provisioning_failed),
        help("{suggestion}")
    )]
    ProvisioningFailed {
        tenant_id: u64,
        message: String,
        suggestion: String,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    #[diagnostic(
        code(scheduler::storage_error),
        help("Check the provisioning catalog")
    )]
    StorageError(#[from] tenantry_storage::StorageError),

    /// Core error (validation, configuration)
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("The caller passed malformed pool or schema data")
    )]
    CoreError(#[from] tenantry_core::TenantryError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a CapacityExceeded error
    pub fn capacity_exceeded(
        pool_id: PoolId,
        schema: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CapacityExceeded {
            pool_id,
            schema: schema.into(),
            reason: reason.into(),
        }
    }

    /// Create a SchemaNotFound error
    pub fn schema_not_found(pool_id: PoolId, schema: impl Into<String>) -> Self {
        Self::SchemaNotFound {
            pool_id,
            schema: schema.into(),
        }
    }

    /// Create a ProvisioningFailed error
    pub fn provisioning_failed(
        tenant_id: u64,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ProvisioningFailed {
            tenant_id,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether a fresh assignment may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::PoolLocked { .. } | Self::SchemaNotFound { .. }
        )
    }

    /// Whether the caller supplied malformed data
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::CoreError(tenantry_core::TenantryError::ValidationFailed { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SchedulerError::capacity_exceeded(PoolId(1), "s1", "schema full").is_retryable());
        assert!(SchedulerError::PoolLocked { pool_id: PoolId(1) }.is_retryable());
        assert!(!SchedulerError::TenantExists { tenant_id: 7 }.is_retryable());

        let err: SchedulerError = tenantry_core::TenantryError::validation_failed(
            "pool 1",
            "weight is negative (-1)",
            "fix it",
        )
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());

        let err: SchedulerError =
            tenantry_storage::StorageError::database_error("catalog offline", None).into();
        assert!(!err.is_validation());
        assert!(!err.is_retryable());
    }
}
