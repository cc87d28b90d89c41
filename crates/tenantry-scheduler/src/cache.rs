//! Per-pool cache of the next schema to place tenants in
//!
//! An entry is built lazily from a [`SchemaLoadSource`] on the first lookup
//! for a pool and reused until it is invalidated. Successful commits
//! decrement the cached schema's remaining room locally; once that reaches
//! zero the entry is dropped and the next lookup reloads from the source.
//! A batch too large for the cached schema is fitted against the entry's
//! snapshot instead.
//!
//! The cache is an accelerator only. The store's insert-time capacity check
//! is authoritative, and a rejected insert must be reported back so the
//! entry is dropped.

use crate::rank::{rank_candidates, RankTotals, SchemaCandidate};
use crate::traits::SchemaLoadSource;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tenantry_core::{PoolId, SchemaLoad, SchemaRecord};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// What the cache currently holds for a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing cached; the next lookup queries the source
    Missing,
    /// A schema with locally tracked remaining room
    Schema { name: String, remaining: i64 },
    /// Every schema was full when the entry was built
    Exhausted,
}

#[derive(Debug, Clone)]
enum Choice {
    Schema { name: String, remaining: i64 },
    Exhausted,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    choice: Choice,
    /// Cap the choice was computed with
    max_units_per_schema: i64,
    /// Counts the choice was computed from, updated on local commits.
    /// Batches the choice cannot hold are fitted against these.
    snapshot: Vec<SchemaLoad>,
}

impl CacheEntry {
    fn schema_name(&self) -> Option<&str> {
        match &self.choice {
            Choice::Schema { name, .. } => Some(name.as_str()),
            Choice::Exhausted => None,
        }
    }

    fn schema_for(&self, pool_id: PoolId, units: i64) -> Result<Option<String>> {
        match &self.choice {
            Choice::Schema { name, remaining } if *remaining >= units => Ok(Some(name.clone())),
            Choice::Exhausted => Ok(None),
            Choice::Schema { name, remaining } => {
                let fit = best_fit(&self.snapshot, self.max_units_per_schema, units)?;
                debug!(
                    "Pool {} schema {} has {} remaining, {} units fit in {:?}",
                    pool_id,
                    name,
                    remaining,
                    units,
                    fit.as_ref().map(|c| c.name.as_str())
                );
                Ok(fit.map(|candidate| candidate.name))
            }
        }
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Cache of the next usable schema per pool
///
/// Each pool has its own slot lock, held across the source query so two
/// lookups for the same pool never initialize the entry twice. Lookups for
/// different pools do not contend.
#[derive(Default)]
pub struct SchemaPlacementCache {
    slots: RwLock<HashMap<PoolId, Slot>>,
}

impl SchemaPlacementCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, pool_id: PoolId) -> Slot {
        if let Some(slot) = self.slots.read().await.get(&pool_id) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(pool_id).or_default())
    }

    async fn existing_slot(&self, pool_id: PoolId) -> Option<Slot> {
        self.slots.read().await.get(&pool_id).cloned()
    }

    /// Return the next usable schema in a pool, or `None` if every schema is full
    ///
    /// A source failure propagates and leaves the slot as it was.
    pub async fn next_schema(
        &self,
        pool_id: PoolId,
        max_units_per_schema: i64,
        source: &dyn SchemaLoadSource,
    ) -> Result<Option<String>> {
        self.next_schema_for(pool_id, max_units_per_schema, 1, source)
            .await
    }

    /// Return a schema in a pool with room for `units` more tenants
    ///
    /// Uses the cached choice when it has room. Otherwise picks the best
    /// fitting schema from the entry's snapshot without replacing the
    /// choice, and returns `None` when no schema can take the whole batch.
    pub async fn next_schema_for(
        &self,
        pool_id: PoolId,
        max_units_per_schema: i64,
        units: i64,
        source: &dyn SchemaLoadSource,
    ) -> Result<Option<String>> {
        let slot = self.slot(pool_id).await;
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.max_units_per_schema == max_units_per_schema {
                debug!(
                    "Schema cache hit for pool {}: {:?}",
                    pool_id,
                    entry.schema_name()
                );
                return entry.schema_for(pool_id, units);
            }

            debug!(
                "Schema cap changed for pool {} ({} -> {}), reloading",
                pool_id, entry.max_units_per_schema, max_units_per_schema
            );
        }

        let snapshot = source.load_schema_counts(pool_id).await?;
        let entry = load_entry(pool_id, snapshot, max_units_per_schema)?;

        match &entry.choice {
            Choice::Schema { name, remaining } => info!(
                "Initialized schema cache for pool {}: {} ({} remaining)",
                pool_id, name, remaining
            ),
            Choice::Exhausted => info!(
                "Initialized schema cache for pool {}: all {} schema(s) full",
                pool_id,
                entry.snapshot.len()
            ),
        }

        guard.insert(entry).schema_for(pool_id, units)
    }

    /// Record that `units` tenants were committed to `schema`
    ///
    /// Decrements the cached schema's remaining room and drops the entry
    /// once it reaches zero. Commits to a schema other than the cached one
    /// only update the snapshot.
    pub async fn record_commit(&self, pool_id: PoolId, schema: &str, units: i64) {
        let Some(slot) = self.existing_slot(pool_id).await else {
            return;
        };
        let mut guard = slot.lock().await;

        let exhausted = match guard.as_mut() {
            Some(entry) => {
                if let Some(load) = entry.snapshot.iter_mut().find(|l| l.name == schema) {
                    load.current_units += units;
                }

                match &mut entry.choice {
                    Choice::Schema { name, remaining } if name.as_str() == schema => {
                        *remaining -= units;
                        debug!(
                            "Pool {} schema {} has {} remaining after commit",
                            pool_id, name, remaining
                        );
                        *remaining <= 0
                    }
                    _ => false,
                }
            }
            None => false,
        };

        if exhausted {
            info!(
                "Cached schema {} in pool {} is full, invalidating",
                schema, pool_id
            );
            *guard = None;
        }
    }

    /// Drop the entry for a pool after a failed commit
    pub async fn record_failure(&self, pool_id: PoolId) {
        self.clear_for(pool_id).await;
    }

    /// Drop the entry for a pool; idempotent
    ///
    /// Removes the slot without waiting on it, so an initialization already
    /// in flight lands in the detached slot and is discarded.
    pub async fn clear_for(&self, pool_id: PoolId) {
        if self.slots.write().await.remove(&pool_id).is_some() {
            info!("Cleared schema cache for pool {}", pool_id);
        }
    }

    /// Drop every entry
    pub async fn clear_all(&self) {
        let mut slots = self.slots.write().await;
        if !slots.is_empty() {
            info!("Cleared schema cache for {} pool(s)", slots.len());
            slots.clear();
        }
    }

    /// Inspect the entry for a pool
    pub async fn state(&self, pool_id: PoolId) -> CacheState {
        let Some(slot) = self.existing_slot(pool_id).await else {
            return CacheState::Missing;
        };

        let guard = slot.lock().await;
        match guard.as_ref().map(|entry| &entry.choice) {
            None => CacheState::Missing,
            Some(Choice::Schema { name, remaining }) => CacheState::Schema {
                name: name.clone(),
                remaining: *remaining,
            },
            Some(Choice::Exhausted) => CacheState::Exhausted,
        }
    }
}

/// Validate a snapshot and pick the schema to cache for it
fn load_entry(
    pool_id: PoolId,
    snapshot: Vec<SchemaLoad>,
    max_units_per_schema: i64,
) -> Result<CacheEntry> {
    for load in &snapshot {
        SchemaRecord::from_load(pool_id, load.clone(), max_units_per_schema).validate()?;
    }

    let choice = match best_fit(&snapshot, max_units_per_schema, 1)? {
        Some(best) => Choice::Schema {
            remaining: best.max_units_per_schema - best.current_units,
            name: best.name,
        },
        None => Choice::Exhausted,
    };

    Ok(CacheEntry {
        choice,
        max_units_per_schema,
        snapshot,
    })
}

/// Best schema with room for `units` more tenants, treating each schema
/// as a uniformly weighted candidate
fn best_fit(
    snapshot: &[SchemaLoad],
    max_units_per_schema: i64,
    units: i64,
) -> Result<Option<SchemaCandidate>> {
    // Over-cap schemas (cap lowered after they filled) never fit
    let candidates: Vec<SchemaCandidate> = snapshot
        .iter()
        .filter(|load| max_units_per_schema - load.current_units >= units)
        .map(|load| SchemaCandidate {
            name: load.name.clone(),
            current_units: load.current_units,
            max_units_per_schema,
        })
        .collect();

    let totals = RankTotals::from_candidates(&candidates);
    Ok(rank_candidates(&candidates, totals)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use crate::traits::TenantStore;
    use crate::types::Assignment;
    use tenantry_core::PoolHandle;

    const POOL: PoolId = PoolId(1);

    async fn cluster_with(schemas: &[(&str, i64)], cap: i64) -> MockCluster {
        let cluster = MockCluster::new(cap);
        cluster.add_pool(PoolHandle::unbounded(POOL, 100, 0)).await;
        for (name, count) in schemas {
            cluster.add_schema(POOL, name, *count).await;
        }
        cluster
    }

    #[tokio::test]
    async fn test_lookup_is_idempotent_and_cached() {
        let cluster = cluster_with(&[("s1", 3), ("s2", 1)], 10).await;
        let cache = SchemaPlacementCache::new();

        let first = cache.next_schema(POOL, 10, &cluster).await.unwrap();
        let second = cache.next_schema(POOL, 10, &cluster).await.unwrap();

        assert_eq!(first.as_deref(), Some("s2"));
        assert_eq!(first, second);
        assert_eq!(cluster.schema_load_calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_forces_reload() {
        let cluster = cluster_with(&[("s1", 3)], 10).await;
        let cache = SchemaPlacementCache::new();

        cache.next_schema(POOL, 10, &cluster).await.unwrap();
        cache.clear_for(POOL).await;
        cache.clear_for(POOL).await;
        assert_eq!(cache.state(POOL).await, CacheState::Missing);

        cache.next_schema(POOL, 10, &cluster).await.unwrap();
        assert_eq!(cluster.schema_load_calls(), 2);
    }

    #[tokio::test]
    async fn test_burst_fills_schema_then_moves_on() {
        let cluster = cluster_with(&[("s1", 8), ("s2", 2)], 10).await;
        let cache = SchemaPlacementCache::new();

        for tenant in 0..8 {
            let schema = cache.next_schema(POOL, 10, &cluster).await.unwrap().unwrap();
            assert_eq!(schema, "s2");

            let assignment = Assignment {
                pool_id: POOL,
                schema: schema.clone(),
                batch_size: 1,
            };
            cluster.insert_tenant(tenant, &assignment).await.unwrap();
            cache.record_commit(POOL, &schema, 1).await;
        }

        // The eighth commit filled s2 and dropped the entry; the ninth lookup reloads
        assert_eq!(cache.state(POOL).await, CacheState::Missing);
        assert_eq!(cluster.schema_load_calls(), 1);

        assert_eq!(
            cache.next_schema(POOL, 10, &cluster).await.unwrap().as_deref(),
            Some("s1")
        );
        assert_eq!(cluster.schema_load_calls(), 2);
    }

    #[tokio::test]
    async fn test_commit_decrements_remaining() {
        let cluster = cluster_with(&[("s1", 4)], 10).await;
        let cache = SchemaPlacementCache::new();

        cache.next_schema(POOL, 10, &cluster).await.unwrap();
        cache.record_commit(POOL, "s1", 2).await;

        assert_eq!(
            cache.state(POOL).await,
            CacheState::Schema {
                name: "s1".to_string(),
                remaining: 4
            }
        );

        // A commit elsewhere leaves the cached choice alone
        cache.record_commit(POOL, "other", 1).await;
        assert!(matches!(cache.state(POOL).await, CacheState::Schema { remaining: 4, .. }));
    }

    #[tokio::test]
    async fn test_batch_fits_another_schema_from_snapshot() {
        let cluster = cluster_with(&[("s1", 5), ("s2", 6)], 10).await;
        let cache = SchemaPlacementCache::new();

        assert_eq!(
            cache.next_schema(POOL, 10, &cluster).await.unwrap().as_deref(),
            Some("s1")
        );
        cache.record_commit(POOL, "s1", 3).await;

        assert_eq!(
            cache
                .next_schema_for(POOL, 10, 3, &cluster)
                .await
                .unwrap()
                .as_deref(),
            Some("s2")
        );
        assert_eq!(
            cache.next_schema_for(POOL, 10, 5, &cluster).await.unwrap(),
            None
        );

        // Fitting a batch leaves the cached choice in place
        assert_eq!(
            cache.state(POOL).await,
            CacheState::Schema {
                name: "s1".to_string(),
                remaining: 2
            }
        );
        assert_eq!(
            cache
                .next_schema_for(POOL, 10, 2, &cluster)
                .await
                .unwrap()
                .as_deref(),
            Some("s1")
        );
        assert_eq!(cluster.schema_load_calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_larger_than_any_room_is_none() {
        let cluster = cluster_with(&[("s1", 8), ("s2", 7)], 10).await;
        let cache = SchemaPlacementCache::new();

        assert_eq!(
            cache.next_schema_for(POOL, 10, 4, &cluster).await.unwrap(),
            None
        );
        assert_eq!(
            cache
                .next_schema_for(POOL, 10, 3, &cluster)
                .await
                .unwrap()
                .as_deref(),
            Some("s2")
        );
    }

    #[tokio::test]
    async fn test_all_full_caches_exhausted() {
        let cluster = cluster_with(&[("s1", 10), ("s2", 12)], 10).await;
        let cache = SchemaPlacementCache::new();

        assert_eq!(cache.next_schema(POOL, 10, &cluster).await.unwrap(), None);
        assert_eq!(cache.next_schema(POOL, 10, &cluster).await.unwrap(), None);
        assert_eq!(cache.state(POOL).await, CacheState::Exhausted);
        assert_eq!(cluster.schema_load_calls(), 1);
    }

    #[tokio::test]
    async fn test_pool_without_schemas_is_exhausted() {
        let cluster = cluster_with(&[], 10).await;
        let cache = SchemaPlacementCache::new();

        assert_eq!(cache.next_schema(POOL, 10, &cluster).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_no_entry() {
        let cluster = cluster_with(&[("s1", 1)], 10).await;
        let cache = SchemaPlacementCache::new();

        cluster.fail_schema_loads(true);
        let err = cache.next_schema(POOL, 10, &cluster).await.unwrap_err();
        assert!(matches!(err, crate::SchedulerError::StorageError(_)));
        assert_eq!(cache.state(POOL).await, CacheState::Missing);

        cluster.fail_schema_loads(false);
        assert_eq!(
            cache.next_schema(POOL, 10, &cluster).await.unwrap().as_deref(),
            Some("s1")
        );
    }

    #[tokio::test]
    async fn test_negative_count_is_validation_error() {
        let cluster = cluster_with(&[("s1", -1)], 10).await;
        let cache = SchemaPlacementCache::new();

        let err = cache.next_schema(POOL, 10, &cluster).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(cache.state(POOL).await, CacheState::Missing);
    }

    #[tokio::test]
    async fn test_cap_change_reloads() {
        let cluster = cluster_with(&[("s1", 5)], 10).await;
        let cache = SchemaPlacementCache::new();

        assert!(cache.next_schema(POOL, 10, &cluster).await.unwrap().is_some());
        assert!(cache.next_schema(POOL, 5, &cluster).await.unwrap().is_none());
        assert_eq!(cluster.schema_load_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_initialize_once() {
        let cluster = Arc::new(cluster_with(&[("s1", 1), ("s2", 0)], 10).await);
        let cache = Arc::new(SchemaPlacementCache::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cluster = Arc::clone(&cluster);
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.next_schema(POOL, 10, cluster.as_ref()).await.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("s2"));
        }
        assert_eq!(cluster.schema_load_calls(), 1);
    }
}
