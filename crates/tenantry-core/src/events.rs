use crate::types::PoolId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of structural change reported for a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementEventType {
    SchemaCreated,
    SchemaRemoved,
    PoolLocked,
    PoolUnlocked,
    ExternalMutation,
}

/// A change to a pool made outside the placement path
///
/// Published by whoever mutates the catalog (schema DDL, maintenance
/// tooling, another admin node) so that cached schema choices can be
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementEvent {
    pub event_type: PlacementEventType,
    pub pool_id: PoolId,
    /// Schema concerned, when the change is about a single schema
    pub schema: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PlacementEvent {
    fn new(event_type: PlacementEventType, pool_id: PoolId, schema: Option<String>) -> Self {
        Self {
            event_type,
            pool_id,
            schema,
            timestamp: Utc::now(),
        }
    }

    /// Create a SCHEMA_CREATED event
    pub fn schema_created(pool_id: PoolId, schema: impl Into<String>) -> Self {
        Self::new(PlacementEventType::SchemaCreated, pool_id, Some(schema.into()))
    }

    /// Create a SCHEMA_REMOVED event
    pub fn schema_removed(pool_id: PoolId, schema: impl Into<String>) -> Self {
        Self::new(PlacementEventType::SchemaRemoved, pool_id, Some(schema.into()))
    }

    /// Create a POOL_LOCKED event
    pub fn pool_locked(pool_id: PoolId) -> Self {
        Self::new(PlacementEventType::PoolLocked, pool_id, None)
    }

    /// Create a POOL_UNLOCKED event
    pub fn pool_unlocked(pool_id: PoolId) -> Self {
        Self::new(PlacementEventType::PoolUnlocked, pool_id, None)
    }

    /// Create an EXTERNAL_MUTATION event
    pub fn external_mutation(pool_id: PoolId) -> Self {
        Self::new(PlacementEventType::ExternalMutation, pool_id, None)
    }
}
