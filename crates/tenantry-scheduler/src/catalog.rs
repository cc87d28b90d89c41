use crate::traits::{PoolSource, SchemaLoadSource, SchemaProvisioner, TenantStore};
use crate::types::{Assignment, PoolState};
use crate::{Result, SchedulerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenantry_core::{
    is_valid_schema_name, PlacementConfig, PlacementEvent, PoolHandle, PoolId, SchemaLoad,
    TenantryError,
};
use tenantry_storage::{
    txn_get_json, txn_put_json, CatalogKey, KVStore, KVStoreExt, KeyEncoder,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the placement event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Stored pool row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub id: PoolId,
    pub weight: i64,
    pub current_units: i64,
    pub max_units: Option<i64>,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl PoolRecord {
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            id: self.id,
            weight: self.weight,
            current_units: self.current_units,
            max_units: self.max_units,
        }
    }
}

/// Stored schema row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub name: String,
    pub pool_id: PoolId,
    pub current_units: i64,
    pub created_at: DateTime<Utc>,
}

/// Stored tenant row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: u64,
    pub pool_id: PoolId,
    pub schema: String,
    /// Units reserved by this tenant
    pub units: i64,
    pub created_at: DateTime<Utc>,
}

/// Provisioning catalog on top of a [`KVStore`]
///
/// Holds pools, schemas and tenant rows. Tenant inserts run inside a single
/// write transaction that recounts the schema and pool before writing, so
/// the store rejects any insert that would overflow either one no matter
/// what the schema cache believed. Structural changes are published as
/// [`PlacementEvent`]s.
pub struct Catalog {
    store: Arc<dyn KVStore>,
    config: PlacementConfig,
    event_tx: broadcast::Sender<PlacementEvent>,
}

impl Catalog {
    pub fn new(store: Arc<dyn KVStore>, config: PlacementConfig) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            store,
            config,
            event_tx,
        })
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Subscribe to placement events
    pub fn subscribe(&self) -> broadcast::Receiver<PlacementEvent> {
        self.event_tx.subscribe()
    }

    fn publish(&self, event: PlacementEvent) {
        // Best-effort: nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    /// Register a new pool
    pub async fn register_pool(&self, handle: &PoolHandle) -> Result<PoolRecord> {
        handle.validate()?;

        let mut txn = self.store.transaction()?;
        let key = CatalogKey::pool(handle.id).encode();
        if txn.get(key.as_bytes())?.is_some() {
            return Err(SchedulerError::PoolAlreadyRegistered { pool_id: handle.id });
        }

        let record = PoolRecord {
            id: handle.id,
            weight: handle.weight,
            current_units: handle.current_units,
            max_units: handle.max_units,
            locked: false,
            locked_at: None,
            registered_at: Utc::now(),
        };

        txn_put_json(txn.as_mut(), &key, &record)?;
        txn.commit()?;
        info!("Registered pool {} with weight {}", handle.id, handle.weight);

        Ok(record)
    }

    /// Get a pool record
    pub async fn pool(&self, pool_id: PoolId) -> Result<PoolRecord> {
        self.store
            .get_json(&CatalogKey::pool(pool_id).encode())?
            .ok_or(SchedulerError::PoolNotFound { pool_id })
    }

    /// List every pool record in key order
    pub async fn pools(&self) -> Result<Vec<PoolRecord>> {
        Ok(self
            .store
            .scan_json::<PoolRecord>(KeyEncoder::pools_prefix())?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Change the weight of a pool
    pub async fn set_weight(&self, pool_id: PoolId, weight: i64) -> Result<()> {
        let mut txn = self.store.transaction()?;
        let key = CatalogKey::pool(pool_id).encode();

        let mut record: PoolRecord =
            txn_get_json(txn.as_ref(), &key)?.ok_or(SchedulerError::PoolNotFound { pool_id })?;
        record.weight = weight;
        record.handle().validate()?;

        txn_put_json(txn.as_mut(), &key, &record)?;
        txn.commit()?;

        info!("Pool {} weight set to {}", pool_id, weight);
        Ok(())
    }

    /// Lock or unlock a pool for maintenance
    pub async fn set_locked(&self, pool_id: PoolId, locked: bool) -> Result<()> {
        let mut txn = self.store.transaction()?;
        let key = CatalogKey::pool(pool_id).encode();

        let mut record: PoolRecord =
            txn_get_json(txn.as_ref(), &key)?.ok_or(SchedulerError::PoolNotFound { pool_id })?;

        if record.locked == locked {
            debug!("Pool {} lock unchanged ({})", pool_id, locked);
            return Ok(());
        }

        record.locked = locked;
        record.locked_at = locked.then(Utc::now);

        txn_put_json(txn.as_mut(), &key, &record)?;
        txn.commit()?;

        if locked {
            info!("Locked pool {}", pool_id);
            self.publish(PlacementEvent::pool_locked(pool_id));
        } else {
            info!("Unlocked pool {}", pool_id);
            self.publish(PlacementEvent::pool_unlocked(pool_id));
        }

        Ok(())
    }

    /// List the schemas of a pool in name order
    pub async fn schemas(&self, pool_id: PoolId) -> Result<Vec<SchemaEntry>> {
        Ok(self
            .store
            .scan_json::<SchemaEntry>(&KeyEncoder::schemas_prefix(pool_id))?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    /// Create the next `{prefix}_{pool}_{n}` schema in a pool
    pub async fn create_schema_in(&self, pool_id: PoolId) -> Result<SchemaEntry> {
        let mut txn = self.store.transaction()?;

        if txn_get_json::<PoolRecord>(txn.as_ref(), &CatalogKey::pool(pool_id).encode())?
            .is_none()
        {
            return Err(SchedulerError::PoolNotFound { pool_id });
        }

        let seq_key = CatalogKey::schema_sequence(pool_id).encode();
        let next = txn_get_json::<u64>(txn.as_ref(), &seq_key)?.unwrap_or(0) + 1;
        let name = format!("{}_{}_{}", self.config.schema_prefix, pool_id, next);

        if !is_valid_schema_name(&name) {
            return Err(TenantryError::validation_failed(
                format!("schema in pool {}", pool_id),
                format!("generated name '{}' is not a valid schema name", name),
                "Use a lowercase schema_prefix and non-negative pool ids",
            )
            .into());
        }

        let schema_key = CatalogKey::schema(pool_id, &name).encode();
        if txn.get(schema_key.as_bytes())?.is_some() {
            return Err(SchedulerError::internal_error(format!(
                "schema {} already exists but the sequence points at it",
                name
            )));
        }

        let entry = SchemaEntry {
            name: name.clone(),
            pool_id,
            current_units: 0,
            created_at: Utc::now(),
        };

        txn_put_json(txn.as_mut(), &schema_key, &entry)?;
        txn_put_json(txn.as_mut(), &seq_key, &next)?;
        txn.commit()?;

        info!("Created schema {} in pool {}", name, pool_id);
        self.publish(PlacementEvent::schema_created(pool_id, name));

        Ok(entry)
    }

    /// Remove an empty schema
    pub async fn drop_schema(&self, pool_id: PoolId, name: &str) -> Result<()> {
        let mut txn = self.store.transaction()?;
        let key = CatalogKey::schema(pool_id, name).encode();

        let entry: SchemaEntry = txn_get_json(txn.as_ref(), &key)?
            .ok_or_else(|| SchedulerError::schema_not_found(pool_id, name))?;

        if entry.current_units > 0 {
            return Err(SchedulerError::SchemaInUse {
                pool_id,
                schema: name.to_string(),
                tenants: entry.current_units,
            });
        }

        txn.delete(key.as_bytes())?;
        txn.commit()?;

        info!("Dropped schema {} from pool {}", name, pool_id);
        self.publish(PlacementEvent::schema_removed(pool_id, name));

        Ok(())
    }

    /// Look up a tenant row
    pub async fn tenant(&self, tenant_id: u64) -> Result<Option<TenantRecord>> {
        Ok(self.store.get_json(&CatalogKey::tenant(tenant_id).encode())?)
    }

    /// Remove a tenant and release its units
    pub async fn remove_tenant(&self, tenant_id: u64) -> Result<TenantRecord> {
        let mut txn = self.store.transaction()?;
        let tenant_key = CatalogKey::tenant(tenant_id).encode();

        let tenant: TenantRecord = txn_get_json(txn.as_ref(), &tenant_key)?
            .ok_or(SchedulerError::TenantNotFound { tenant_id })?;

        let schema_key = CatalogKey::schema(tenant.pool_id, &tenant.schema).encode();
        if let Some(mut entry) = txn_get_json::<SchemaEntry>(txn.as_ref(), &schema_key)? {
            entry.current_units = (entry.current_units - tenant.units).max(0);
            txn_put_json(txn.as_mut(), &schema_key, &entry)?;
        } else {
            warn!(
                "Tenant {} references missing schema {} in pool {}",
                tenant_id, tenant.schema, tenant.pool_id
            );
        }

        let pool_key = CatalogKey::pool(tenant.pool_id).encode();
        if let Some(mut pool) = txn_get_json::<PoolRecord>(txn.as_ref(), &pool_key)? {
            pool.current_units = (pool.current_units - tenant.units).max(0);
            txn_put_json(txn.as_mut(), &pool_key, &pool)?;
        }

        txn.delete(tenant_key.as_bytes())?;
        txn.commit()?;

        info!(
            "Removed tenant {} from pool {} / {}",
            tenant_id, tenant.pool_id, tenant.schema
        );
        // Freed room the schema cache may have written off
        self.publish(PlacementEvent::external_mutation(tenant.pool_id));

        Ok(tenant)
    }
}

#[async_trait]
impl PoolSource for Catalog {
    async fn load_pools(&self) -> Result<Vec<PoolState>> {
        let pools = self.pools().await?;
        debug!("Loaded {} pool(s) from catalog", pools.len());

        Ok(pools
            .into_iter()
            .map(|record| PoolState::new(record.handle(), record.locked))
            .collect())
    }
}

#[async_trait]
impl SchemaLoadSource for Catalog {
    async fn load_schema_counts(&self, pool_id: PoolId) -> Result<Vec<SchemaLoad>> {
        let loads: Vec<SchemaLoad> = self
            .schemas(pool_id)
            .await?
            .into_iter()
            .map(|entry| SchemaLoad::new(entry.name, entry.current_units))
            .collect();

        debug!("Loaded {} schema count(s) for pool {}", loads.len(), pool_id);
        Ok(loads)
    }
}

#[async_trait]
impl TenantStore for Catalog {
    async fn insert_tenant(&self, tenant_id: u64, assignment: &Assignment) -> Result<()> {
        let Assignment {
            pool_id,
            schema,
            batch_size,
        } = assignment;
        let pool_id = *pool_id;
        let units = *batch_size;

        if units <= 0 {
            return Err(TenantryError::validation_failed(
                format!("tenant {}", tenant_id),
                format!("units must be positive, got {}", units),
                "Insert at least one unit",
            )
            .into());
        }

        // Write transactions are serialized; every check below sees the
        // counts as of this transaction
        let mut txn = self.store.transaction()?;

        let tenant_key = CatalogKey::tenant(tenant_id).encode();
        if txn.get(tenant_key.as_bytes())?.is_some() {
            return Err(SchedulerError::TenantExists { tenant_id });
        }

        let pool_key = CatalogKey::pool(pool_id).encode();
        let mut pool: PoolRecord =
            txn_get_json(txn.as_ref(), &pool_key)?.ok_or(SchedulerError::PoolNotFound { pool_id })?;

        if pool.locked {
            warn!("Rejected tenant {}: pool {} is locked", tenant_id, pool_id);
            return Err(SchedulerError::PoolLocked { pool_id });
        }

        if !pool.handle().has_room_for(units) {
            warn!("Rejected tenant {}: pool {} is full", tenant_id, pool_id);
            return Err(SchedulerError::capacity_exceeded(
                pool_id,
                schema.as_str(),
                format!(
                    "pool holds {} of {:?} units",
                    pool.current_units, pool.max_units
                ),
            ));
        }

        let schema_key = CatalogKey::schema(pool_id, schema).encode();
        let mut entry: SchemaEntry = txn_get_json(txn.as_ref(), &schema_key)?
            .ok_or_else(|| SchedulerError::schema_not_found(pool_id, schema.as_str()))?;

        if entry.current_units + units > self.config.max_units_per_schema {
            warn!(
                "Rejected tenant {}: schema {} in pool {} is full",
                tenant_id, schema, pool_id
            );
            return Err(SchedulerError::capacity_exceeded(
                pool_id,
                schema.as_str(),
                format!(
                    "schema holds {} of {} units",
                    entry.current_units, self.config.max_units_per_schema
                ),
            ));
        }

        entry.current_units += units;
        pool.current_units += units;

        let tenant = TenantRecord {
            tenant_id,
            pool_id,
            schema: schema.clone(),
            units,
            created_at: Utc::now(),
        };

        txn_put_json(txn.as_mut(), &schema_key, &entry)?;
        txn_put_json(txn.as_mut(), &pool_key, &pool)?;
        txn_put_json(txn.as_mut(), &tenant_key, &tenant)?;
        txn.commit()?;

        debug!("Inserted tenant {} into {}", tenant_id, assignment);
        Ok(())
    }
}

#[async_trait]
impl SchemaProvisioner for Catalog {
    async fn create_schema(&self, pool_id: PoolId) -> Result<String> {
        Ok(self.create_schema_in(pool_id).await?.name)
    }
}
