use crate::types::{Assignment, PoolState};
use crate::Result;
use async_trait::async_trait;
use tenantry_core::{PoolId, SchemaLoad};

/// Supplies the current tenant count of every schema in a pool
///
/// Implemented by the storage layer (a query against the provisioning
/// catalog). Any timeout is the implementation's business.
#[async_trait]
pub trait SchemaLoadSource: Send + Sync {
    async fn load_schema_counts(&self, pool_id: PoolId) -> Result<Vec<SchemaLoad>>;
}

/// Supplies a snapshot of every pool in the cluster
#[async_trait]
pub trait PoolSource: Send + Sync {
    async fn load_pools(&self) -> Result<Vec<PoolState>>;
}

/// Commits tenants under a store-level capacity constraint
///
/// The store is the authority on capacity: an insert into a full schema or
/// pool must fail with `SchedulerError::CapacityExceeded`.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn insert_tenant(&self, tenant_id: u64, assignment: &Assignment) -> Result<()>;
}

/// Creates a new, empty schema in a pool and returns its name
#[async_trait]
pub trait SchemaProvisioner: Send + Sync {
    async fn create_schema(&self, pool_id: PoolId) -> Result<String>;
}
