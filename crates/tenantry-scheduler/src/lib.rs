//! Tenantry Scheduler - Tenant placement across weighted database pools
//!
//! This crate provides:
//! - Eligibility filters (weight, lock, room for the batch)
//! - Fair-share ranking of pools and schemas (`WeightedPoolRanker`)
//! - Per-pool schema choice cache (`SchemaPlacementCache`)
//! - Placement coordination and event handling (`PlacementCoordinator`)
//! - A redb-backed provisioning catalog and a retrying `Provisioner`

pub mod cache;
pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod mock;
pub mod provision;
pub mod rank;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheState, SchemaPlacementCache};
pub use catalog::{Catalog, PoolRecord, SchemaEntry, TenantRecord};
pub use coordinator::PlacementCoordinator;
pub use error::{Result, SchedulerError};
pub use provision::Provisioner;
pub use rank::{RankCandidate, RankTotals, SchemaCandidate, WeightedPoolRanker};
pub use traits::{PoolSource, SchemaLoadSource, SchemaProvisioner, TenantStore};
pub use types::{Assignment, FilterResult, NoCapacityReason, Placement, PoolState};
