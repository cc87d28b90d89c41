use crate::traits::{PoolSource, SchemaLoadSource, SchemaProvisioner, TenantStore};
use crate::types::{Assignment, PoolState};
use crate::{Result, SchedulerError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tenantry_core::{PoolHandle, PoolId, SchemaLoad};
use tenantry_storage::StorageError;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory cluster for tests and local development
///
/// Implements every collaborator interface of the placement engine and
/// counts calls so tests can assert when the schema cache went back to the
/// source.
pub struct MockCluster {
    max_units_per_schema: i64,
    pools: RwLock<BTreeMap<PoolId, PoolState>>,
    schemas: RwLock<BTreeMap<PoolId, BTreeMap<String, i64>>>,
    schema_loads: AtomicUsize,
    pool_loads: AtomicUsize,
    fail_schema_loads: AtomicBool,
    created_schemas: AtomicUsize,
}

impl MockCluster {
    pub fn new(max_units_per_schema: i64) -> Self {
        Self {
            max_units_per_schema,
            pools: RwLock::new(BTreeMap::new()),
            schemas: RwLock::new(BTreeMap::new()),
            schema_loads: AtomicUsize::new(0),
            pool_loads: AtomicUsize::new(0),
            fail_schema_loads: AtomicBool::new(false),
            created_schemas: AtomicUsize::new(0),
        }
    }

    pub async fn add_pool(&self, handle: PoolHandle) {
        self.schemas.write().await.entry(handle.id).or_default();
        self.pools
            .write()
            .await
            .insert(handle.id, PoolState::unlocked(handle));
    }

    pub async fn add_schema(&self, pool_id: PoolId, name: &str, current_units: i64) {
        self.schemas
            .write()
            .await
            .entry(pool_id)
            .or_default()
            .insert(name.to_string(), current_units);
    }

    pub async fn set_locked(&self, pool_id: PoolId, locked: bool) {
        if let Some(state) = self.pools.write().await.get_mut(&pool_id) {
            state.locked = locked;
        }
    }

    pub async fn schema_count(&self, pool_id: PoolId, name: &str) -> Option<i64> {
        self.schemas
            .read()
            .await
            .get(&pool_id)
            .and_then(|schemas| schemas.get(name).copied())
    }

    /// Make subsequent schema loads fail with a storage error
    pub fn fail_schema_loads(&self, fail: bool) {
        self.fail_schema_loads.store(fail, Ordering::SeqCst);
    }

    pub fn schema_load_calls(&self) -> usize {
        self.schema_loads.load(Ordering::SeqCst)
    }

    pub fn pool_load_calls(&self) -> usize {
        self.pool_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaLoadSource for MockCluster {
    async fn load_schema_counts(&self, pool_id: PoolId) -> Result<Vec<SchemaLoad>> {
        self.schema_loads.fetch_add(1, Ordering::SeqCst);

        if self.fail_schema_loads.load(Ordering::SeqCst) {
            return Err(StorageError::database_error("mock catalog unavailable", None).into());
        }

        let schemas = self.schemas.read().await;
        let loads = schemas
            .get(&pool_id)
            .map(|schemas| {
                schemas
                    .iter()
                    .map(|(name, count)| SchemaLoad::new(name.clone(), *count))
                    .collect()
            })
            .unwrap_or_default();

        debug!("Mock: loaded schema counts for pool {}", pool_id);
        Ok(loads)
    }
}

#[async_trait]
impl PoolSource for MockCluster {
    async fn load_pools(&self) -> Result<Vec<PoolState>> {
        self.pool_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.pools.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl TenantStore for MockCluster {
    async fn insert_tenant(&self, tenant_id: u64, assignment: &Assignment) -> Result<()> {
        let mut pools = self.pools.write().await;
        let mut schemas = self.schemas.write().await;

        let pool = pools.get_mut(&assignment.pool_id).ok_or(SchedulerError::PoolNotFound {
            pool_id: assignment.pool_id,
        })?;

        if pool.locked {
            return Err(SchedulerError::PoolLocked {
                pool_id: assignment.pool_id,
            });
        }

        if !pool.handle.has_room_for(assignment.batch_size) {
            return Err(SchedulerError::capacity_exceeded(
                assignment.pool_id,
                &assignment.schema,
                "pool is full",
            ));
        }

        let count = schemas
            .get_mut(&assignment.pool_id)
            .and_then(|schemas| schemas.get_mut(&assignment.schema))
            .ok_or_else(|| SchedulerError::schema_not_found(assignment.pool_id, &assignment.schema))?;

        if *count + assignment.batch_size > self.max_units_per_schema {
            return Err(SchedulerError::capacity_exceeded(
                assignment.pool_id,
                &assignment.schema,
                "schema is full",
            ));
        }

        *count += assignment.batch_size;
        pool.handle.current_units += assignment.batch_size;

        debug!("Mock: inserted tenant {} into {}", tenant_id, assignment);
        Ok(())
    }
}

#[async_trait]
impl SchemaProvisioner for MockCluster {
    async fn create_schema(&self, pool_id: PoolId) -> Result<String> {
        let n = self.created_schemas.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("mock_{}_{}", pool_id, n);
        self.add_schema(pool_id, &name, 0).await;
        debug!("Mock: created schema {}", name);
        Ok(name)
    }
}
