use crate::coordinator::PlacementCoordinator;
use crate::traits::{SchemaProvisioner, TenantStore};
use crate::types::{Assignment, NoCapacityReason, Placement};
use crate::{Result, SchedulerError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Places single tenants end to end
///
/// Drives the assign / commit / report cycle against a [`TenantStore`],
/// retrying when the store rejects a stale choice and asking a
/// [`SchemaProvisioner`] for a new schema when every schema is full.
pub struct Provisioner {
    coordinator: Arc<PlacementCoordinator>,
    store: Arc<dyn TenantStore>,
    schemas: Arc<dyn SchemaProvisioner>,
    max_attempts: u32,
}

impl Provisioner {
    pub fn new(
        coordinator: Arc<PlacementCoordinator>,
        store: Arc<dyn TenantStore>,
        schemas: Arc<dyn SchemaProvisioner>,
    ) -> Self {
        let max_attempts = coordinator.config().max_attempts.max(1);
        Self {
            coordinator,
            store,
            schemas,
            max_attempts,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn coordinator(&self) -> &Arc<PlacementCoordinator> {
        &self.coordinator
    }

    /// Place one tenant and commit it
    pub async fn provision(&self, tenant_id: u64) -> Result<Assignment> {
        for attempt in 1..=self.max_attempts {
            debug!("Provisioning tenant {} (attempt {})", tenant_id, attempt);

            match self.coordinator.assign(1).await? {
                Placement::Assigned(assignment) => {
                    match self.store.insert_tenant(tenant_id, &assignment).await {
                        Ok(()) => {
                            self.coordinator.report_commit(&assignment).await;
                            info!("Provisioned tenant {} into {}", tenant_id, assignment);
                            return Ok(assignment);
                        }
                        Err(e) if e.is_retryable() => {
                            warn!("Store rejected tenant {}: {}", tenant_id, e);
                            self.coordinator.report_failure(&assignment).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Placement::NoCapacity {
                    candidate: Some(pool_id),
                    ..
                } => {
                    let schema = self.schemas.create_schema(pool_id).await?;
                    info!(
                        "Created schema {} in pool {} for tenant {}",
                        schema, pool_id, tenant_id
                    );
                    self.coordinator.cache().clear_for(pool_id).await;
                }
                Placement::NoCapacity {
                    reason,
                    candidate: None,
                } => {
                    let suggestion = match reason {
                        NoCapacityReason::AllPoolsLocked => {
                            "Wait for pool maintenance to finish"
                        }
                        _ => "Add a pool or raise the weight or ceiling of an existing one",
                    };
                    return Err(SchedulerError::provisioning_failed(
                        tenant_id,
                        format!("no capacity ({})", reason),
                        suggestion,
                    ));
                }
            }
        }

        Err(SchedulerError::provisioning_failed(
            tenant_id,
            format!("gave up after {} attempt(s)", self.max_attempts),
            "Placement kept going stale; retry the request",
        ))
    }
}
