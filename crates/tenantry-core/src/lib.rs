//! Tenantry Core - Fundamental types for multi-tenant schema placement
//!
//! This crate provides:
//! - Pool and schema value types with boundary validation
//! - Error types with miette diagnostics
//! - Placement events used to invalidate cached schema choices
//! - Placement configuration and serialization helpers

pub mod config;
pub mod error;
pub mod events;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use config::PlacementConfig;
pub use error::{Result, TenantryError};
pub use events::{PlacementEvent, PlacementEventType};
pub use schema::{is_valid_schema_name, SchemaLoad, SchemaRecord};
pub use types::{PoolHandle, PoolId};

/// Serialize a value to JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        TenantryError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        TenantryError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        TenantryError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        TenantryError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}
