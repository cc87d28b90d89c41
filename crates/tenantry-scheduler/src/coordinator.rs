use crate::cache::SchemaPlacementCache;
use crate::filter::{default_filters, FilterContext, FilterPredicate};
use crate::rank::{RankTotals, WeightedPoolRanker};
use crate::traits::{PoolSource, SchemaLoadSource};
use crate::types::{Assignment, NoCapacityReason, Placement};
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tenantry_core::{
    PlacementConfig, PlacementEvent, PlacementEventType, PoolHandle, PoolId, TenantryError,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pools that passed every filter, plus how many were held back only by a lock
struct Eligibility {
    pools: Vec<PoolHandle>,
    locked: usize,
}

/// Chooses a pool and schema for new tenants
///
/// Ranks eligible pools by fair-share deviation, then asks the schema cache
/// for a schema in each pool in rank order until one has room. Stateless
/// across requests apart from the shared cache and the set of pools
/// reported locked through placement events.
pub struct PlacementCoordinator {
    pools: Arc<dyn PoolSource>,
    schemas: Arc<dyn SchemaLoadSource>,
    cache: Arc<SchemaPlacementCache>,
    config: PlacementConfig,
    filters: Vec<Box<dyn FilterPredicate>>,
    ranker: WeightedPoolRanker,
    locked: RwLock<HashSet<PoolId>>,
}

impl PlacementCoordinator {
    /// Create a new coordinator with its own cache
    pub fn new(
        pools: Arc<dyn PoolSource>,
        schemas: Arc<dyn SchemaLoadSource>,
        config: PlacementConfig,
    ) -> Self {
        Self {
            pools,
            schemas,
            cache: Arc::new(SchemaPlacementCache::new()),
            config,
            filters: default_filters(),
            ranker: WeightedPoolRanker::new(),
            locked: RwLock::new(HashSet::new()),
        }
    }

    /// Share an existing cache
    pub fn with_cache(mut self, cache: Arc<SchemaPlacementCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<SchemaPlacementCache> {
        &self.cache
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Pick a pool and schema for `batch_size` new tenants
    ///
    /// The caller performs the insert and reports the outcome through
    /// [`report_commit`](Self::report_commit) or
    /// [`report_failure`](Self::report_failure).
    pub async fn assign(&self, batch_size: i64) -> Result<Placement> {
        if batch_size <= 0 {
            return Err(TenantryError::validation_failed(
                "assignment request",
                format!("batch size must be positive, got {}", batch_size),
                "Request at least one tenant",
            )
            .into());
        }

        let context = FilterContext::new(batch_size);
        let eligibility = self.eligible_pools(&context).await?;

        let totals = RankTotals::from_candidates(&eligibility.pools);
        let ranked = self
            .ranker
            .rank(&eligibility.pools, totals.total_units, totals.total_weight)?;

        if ranked.is_empty() {
            let reason = if eligibility.locked > 0 {
                NoCapacityReason::AllPoolsLocked
            } else {
                NoCapacityReason::NoEligiblePools
            };
            info!("No capacity for {} tenant(s): {}", batch_size, reason);
            return Ok(Placement::NoCapacity {
                reason,
                candidate: None,
            });
        }

        debug!("Ranked {} pool(s) for {} tenant(s)", ranked.len(), batch_size);

        let mut exhausted: Option<PoolId> = None;
        let mut skipped_locked = 0usize;

        for pool in &ranked {
            // A lock may have been reported after the snapshot was taken
            if self.locked.read().await.contains(&pool.id) {
                debug!("Skipping pool {}: locked after snapshot", pool.id);
                skipped_locked += 1;
                continue;
            }

            let schema = self
                .cache
                .next_schema_for(
                    pool.id,
                    self.config.max_units_per_schema,
                    batch_size,
                    self.schemas.as_ref(),
                )
                .await?;

            match schema {
                Some(schema) => {
                    let assignment = Assignment {
                        pool_id: pool.id,
                        schema,
                        batch_size,
                    };
                    info!("Assigned {}", assignment);
                    return Ok(Placement::Assigned(assignment));
                }
                None => {
                    debug!(
                        "Pool {} has no schema with room for {}, falling back",
                        pool.id, batch_size
                    );
                    exhausted.get_or_insert(pool.id);
                }
            }
        }

        let reason = if exhausted.is_none() && skipped_locked > 0 {
            NoCapacityReason::AllPoolsLocked
        } else {
            NoCapacityReason::AllSchemasFull
        };

        info!(
            "No capacity for {} tenant(s): {} (candidate pool for a new schema: {:?})",
            batch_size, reason, exhausted
        );

        Ok(Placement::NoCapacity {
            reason,
            candidate: exhausted,
        })
    }

    /// Snapshot pools and run the eligibility filters
    async fn eligible_pools(&self, context: &FilterContext) -> Result<Eligibility> {
        let snapshot = self.pools.load_pools().await?;
        let marked = self.locked.read().await.clone();

        for state in &snapshot {
            state.handle.validate()?;
        }

        let mut eligibility = Eligibility {
            pools: Vec::new(),
            locked: 0,
        };

        for mut state in snapshot {
            state.locked |= marked.contains(&state.handle.id);

            let failed = self
                .filters
                .iter()
                .map(|filter| (filter.name(), filter.filter(context, &state)))
                .find(|(_, result)| !result.passed);

            match failed {
                None => eligibility.pools.push(state.handle),
                Some((name, result)) => {
                    debug!(
                        "Pool {} filtered out by {}: {}",
                        state.handle.id,
                        name,
                        result.reason.unwrap_or_default()
                    );
                    if name == "NotLocked" {
                        eligibility.locked += 1;
                    }
                }
            }
        }

        Ok(eligibility)
    }

    /// The caller committed the assignment
    pub async fn report_commit(&self, assignment: &Assignment) {
        self.cache
            .record_commit(assignment.pool_id, &assignment.schema, assignment.batch_size)
            .await;
    }

    /// The caller failed to commit the assignment
    pub async fn report_failure(&self, assignment: &Assignment) {
        warn!("Commit failed for {}, invalidating cached schema", assignment);
        self.cache.record_failure(assignment.pool_id).await;
    }

    /// Whether a lock has been reported for a pool through events
    pub async fn is_marked_locked(&self, pool_id: PoolId) -> bool {
        self.locked.read().await.contains(&pool_id)
    }

    /// Apply a structural change reported for a pool
    pub async fn handle_event(&self, event: &PlacementEvent) {
        debug!("Placement event {:?} for pool {}", event.event_type, event.pool_id);

        match event.event_type {
            PlacementEventType::SchemaCreated
            | PlacementEventType::SchemaRemoved
            | PlacementEventType::ExternalMutation => {
                self.cache.clear_for(event.pool_id).await;
            }
            PlacementEventType::PoolLocked => {
                // The cached schema may still be valid once unlocked
                self.locked.write().await.insert(event.pool_id);
                info!("Pool {} locked", event.pool_id);
            }
            PlacementEventType::PoolUnlocked => {
                self.locked.write().await.remove(&event.pool_id);
                self.cache.clear_for(event.pool_id).await;
                info!("Pool {} unlocked", event.pool_id);
            }
        }
    }

    /// Consume placement events until cancelled or the channel closes
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<PlacementEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        info!("Starting placement event loop");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Placement event loop shutting down");
                    return Ok(());
                }
                received = events.recv() => match received {
                    Ok(event) => self.handle_event(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            "Missed {} placement event(s), clearing schema cache and lock marks",
                            missed
                        );
                        self.cache.clear_all().await;
                        // The pool snapshot still carries the stored lock flag
                        self.locked.write().await.clear();
                    }
                    Err(RecvError::Closed) => {
                        info!("Placement event channel closed");
                        return Ok(());
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheState;
    use crate::mock::MockCluster;
    use crate::traits::TenantStore;

    fn config(cap: i64) -> PlacementConfig {
        PlacementConfig {
            max_units_per_schema: cap,
            ..PlacementConfig::default()
        }
    }

    fn coordinator(cluster: &Arc<MockCluster>, cap: i64) -> PlacementCoordinator {
        PlacementCoordinator::new(cluster.clone(), cluster.clone(), config(cap))
    }

    fn assigned(placement: &Placement) -> (i32, &str) {
        let assignment = placement.assignment().expect("expected an assignment");
        (assignment.pool_id.get(), assignment.schema.as_str())
    }

    #[tokio::test]
    async fn test_assigns_least_loaded_pool() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 50, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 10, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 0).await;
        cluster.add_schema(PoolId(2), "b1", 6).await;
        cluster.add_schema(PoolId(2), "b2", 4).await;

        let placement = coordinator(&cluster, 10).assign(1).await.unwrap();
        assert_eq!(assigned(&placement), (2, "b2"));
    }

    #[tokio::test]
    async fn test_falls_back_when_top_pool_is_exhausted() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 10, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 20, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 10).await;
        cluster.add_schema(PoolId(2), "b1", 9).await;

        let coordinator = coordinator(&cluster, 10);
        let placement = coordinator.assign(1).await.unwrap();
        assert_eq!(assigned(&placement), (2, "b1"));
        assert_eq!(coordinator.cache().state(PoolId(1)).await, CacheState::Exhausted);
    }

    #[tokio::test]
    async fn test_no_capacity_names_candidate_pool() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 10, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 20, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 10).await;
        cluster.add_schema(PoolId(2), "b1", 10).await;
        cluster.add_schema(PoolId(2), "b2", 10).await;

        let placement = coordinator(&cluster, 10).assign(1).await.unwrap();
        assert_eq!(
            placement,
            Placement::NoCapacity {
                reason: NoCapacityReason::AllSchemasFull,
                candidate: Some(PoolId(1)),
            }
        );
    }

    #[tokio::test]
    async fn test_no_pools_is_no_capacity() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 0, 0, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 1000, 1000)).await;

        let placement = coordinator(&cluster, 10).assign(1).await.unwrap();
        assert_eq!(
            placement,
            Placement::NoCapacity {
                reason: NoCapacityReason::NoEligiblePools,
                candidate: None,
            }
        );
    }

    #[tokio::test]
    async fn test_batch_must_fit_in_pool() {
        let cluster = Arc::new(MockCluster::new(100));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 995, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 50).await;
        cluster.add_schema(PoolId(2), "b1", 0).await;

        // Pool 2 has only 5 left
        let placement = coordinator(&cluster, 100).assign(10).await.unwrap();
        assert_eq!(assigned(&placement), (1, "a1"));
        assert_eq!(placement.assignment().unwrap().batch_size, 10);
    }

    #[tokio::test]
    async fn test_batch_no_schema_can_hold_names_candidate() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 15, 1000)).await;
        cluster.add_schema(PoolId(1), "s1", 8).await;
        cluster.add_schema(PoolId(1), "s2", 7).await;

        let coordinator = coordinator(&cluster, 10);
        assert_eq!(
            coordinator.assign(4).await.unwrap(),
            Placement::NoCapacity {
                reason: NoCapacityReason::AllSchemasFull,
                candidate: Some(PoolId(1)),
            }
        );

        // Single tenants still use the cached schema
        assert_eq!(assigned(&coordinator.assign(1).await.unwrap()), (1, "s2"));
        assert_eq!(assigned(&coordinator.assign(3).await.unwrap()), (1, "s2"));
    }

    #[tokio::test]
    async fn test_batch_falls_back_to_pool_that_fits() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 50, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 8).await;
        cluster.add_schema(PoolId(2), "b1", 2).await;

        let coordinator = coordinator(&cluster, 10);
        let placement = coordinator.assign(4).await.unwrap();
        assert_eq!(assigned(&placement), (2, "b1"));

        let assignment = placement.assignment().unwrap();
        cluster.insert_tenant(1, assignment).await.unwrap();
        coordinator.report_commit(assignment).await;
        assert_eq!(cluster.schema_count(PoolId(2), "b1").await, Some(6));
    }

    #[tokio::test]
    async fn test_all_locked_degenerates_to_no_capacity() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 0).await;
        cluster.set_locked(PoolId(1), true).await;

        let placement = coordinator(&cluster, 10).assign(1).await.unwrap();
        assert_eq!(
            placement,
            Placement::NoCapacity {
                reason: NoCapacityReason::AllPoolsLocked,
                candidate: None,
            }
        );
    }

    #[tokio::test]
    async fn test_lock_event_skips_pool_and_keeps_cache() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 5, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 0).await;
        cluster.add_schema(PoolId(2), "b1", 5).await;

        let coordinator = coordinator(&cluster, 10);
        assert_eq!(assigned(&coordinator.assign(1).await.unwrap()), (1, "a1"));

        coordinator
            .handle_event(&PlacementEvent::pool_locked(PoolId(1)))
            .await;
        assert!(coordinator.is_marked_locked(PoolId(1)).await);

        assert_eq!(assigned(&coordinator.assign(1).await.unwrap()), (2, "b1"));
        assert!(matches!(
            coordinator.cache().state(PoolId(1)).await,
            CacheState::Schema { .. }
        ));

        coordinator
            .handle_event(&PlacementEvent::pool_unlocked(PoolId(1)))
            .await;
        assert!(!coordinator.is_marked_locked(PoolId(1)).await);
        assert_eq!(coordinator.cache().state(PoolId(1)).await, CacheState::Missing);
    }

    #[tokio::test]
    async fn test_malformed_pool_is_validation_error() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, -1, 0, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 0, 1000)).await;

        let err = coordinator(&cluster, 10).assign(1).await.unwrap_err();
        assert!(err.is_validation());

        let err = coordinator(&cluster, 10).assign(0).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.fail_schema_loads(true);

        let err = coordinator(&cluster, 10).assign(1).await.unwrap_err();
        assert!(matches!(err, crate::SchedulerError::StorageError(_)));
    }

    #[tokio::test]
    async fn test_reporting_reconciles_cache() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 3).await;

        let coordinator = coordinator(&cluster, 10);
        let placement = coordinator.assign(2).await.unwrap();
        let assignment = placement.assignment().unwrap();

        coordinator.report_commit(assignment).await;
        assert_eq!(
            coordinator.cache().state(PoolId(1)).await,
            CacheState::Schema {
                name: "a1".to_string(),
                remaining: 5
            }
        );

        coordinator.report_failure(assignment).await;
        assert_eq!(coordinator.cache().state(PoolId(1)).await, CacheState::Missing);
    }

    #[tokio::test]
    async fn test_event_loop_applies_events_until_closed() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 0).await;

        let coordinator = coordinator(&cluster, 10);
        coordinator.assign(1).await.unwrap();

        let (tx, rx) = broadcast::channel(16);
        tx.send(PlacementEvent::schema_created(PoolId(1), "a2")).unwrap();
        tx.send(PlacementEvent::pool_locked(PoolId(1))).unwrap();
        drop(tx);

        coordinator.run(rx, CancellationToken::new()).await.unwrap();

        assert_eq!(coordinator.cache().state(PoolId(1)).await, CacheState::Missing);
        assert!(coordinator.is_marked_locked(PoolId(1)).await);
    }

    #[tokio::test]
    async fn test_event_loop_clears_everything_when_lagging() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_pool(PoolHandle::new(2, 100, 0, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 0).await;
        cluster.add_schema(PoolId(2), "b1", 0).await;

        let coordinator = coordinator(&cluster, 10);
        assert_eq!(assigned(&coordinator.assign(1).await.unwrap()), (1, "a1"));

        let (tx, rx) = broadcast::channel(1);
        for _ in 0..3 {
            tx.send(PlacementEvent::external_mutation(PoolId(2))).unwrap();
        }
        drop(tx);

        coordinator.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(coordinator.cache().state(PoolId(1)).await, CacheState::Missing);
    }

    #[tokio::test]
    async fn test_lagging_drops_lock_marks_from_missed_unlock() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 0).await;

        let coordinator = coordinator(&cluster, 10);
        coordinator
            .handle_event(&PlacementEvent::pool_locked(PoolId(1)))
            .await;

        // The unlock is overwritten before the loop reads it
        let (tx, rx) = broadcast::channel(1);
        tx.send(PlacementEvent::pool_unlocked(PoolId(1))).unwrap();
        tx.send(PlacementEvent::external_mutation(PoolId(1))).unwrap();
        tx.send(PlacementEvent::external_mutation(PoolId(1))).unwrap();
        drop(tx);

        coordinator.run(rx, CancellationToken::new()).await.unwrap();

        assert!(!coordinator.is_marked_locked(PoolId(1)).await);
        let placement = coordinator.assign(1).await.unwrap();
        assert!(placement.is_assigned());
        assert_eq!(assigned(&placement), (1, "a1"));
    }

    #[tokio::test]
    async fn test_lagging_keeps_stored_lock() {
        let cluster = Arc::new(MockCluster::new(10));
        cluster.add_pool(PoolHandle::new(1, 100, 0, 1000)).await;
        cluster.add_schema(PoolId(1), "a1", 0).await;
        cluster.set_locked(PoolId(1), true).await;

        let coordinator = coordinator(&cluster, 10);
        let (tx, rx) = broadcast::channel(1);
        tx.send(PlacementEvent::pool_locked(PoolId(1))).unwrap();
        tx.send(PlacementEvent::external_mutation(PoolId(1))).unwrap();
        drop(tx);

        coordinator.run(rx, CancellationToken::new()).await.unwrap();

        assert_eq!(
            coordinator.assign(1).await.unwrap(),
            Placement::NoCapacity {
                reason: NoCapacityReason::AllPoolsLocked,
                candidate: None,
            }
        );
    }

    #[tokio::test]
    async fn test_event_loop_stops_on_cancel() {
        let cluster = Arc::new(MockCluster::new(10));
        let coordinator = coordinator(&cluster, 10);

        let (_tx, rx) = broadcast::channel::<PlacementEvent>(4);
        let token = CancellationToken::new();
        token.cancel();

        coordinator.run(rx, token).await.unwrap();
    }
}
