use crate::types::PoolId;
use crate::{Result, TenantryError};
use serde::{Deserialize, Serialize};

/// Tenant count of one schema, as reported by a schema load source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaLoad {
    /// Schema name
    pub name: String,
    /// Tenants currently stored in the schema
    pub current_units: i64,
}

impl SchemaLoad {
    pub fn new(name: impl Into<String>, current_units: i64) -> Self {
        Self {
            name: name.into(),
            current_units,
        }
    }
}

/// A schema within a pool, paired with the cluster-wide per-schema cap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub name: String,
    pub pool_id: PoolId,
    pub current_units: i64,
    pub max_units_per_schema: i64,
}

impl SchemaRecord {
    /// Pair a reported load with its pool and the configured cap
    pub fn from_load(pool_id: PoolId, load: SchemaLoad, max_units_per_schema: i64) -> Self {
        Self {
            name: load.name,
            pool_id,
            current_units: load.current_units,
            max_units_per_schema,
        }
    }

    /// Reject negative counts and non-positive caps
    ///
    /// A count above the cap is not an error here: the cap is configuration
    /// and may have been lowered after the schema filled up.
    pub fn validate(&self) -> Result<()> {
        if self.current_units < 0 {
            return Err(TenantryError::validation_failed(
                format!("schema {} in pool {}", self.name, self.pool_id),
                format!("current units is negative ({})", self.current_units),
                "Recount the tenants stored in this schema",
            ));
        }

        if self.max_units_per_schema <= 0 {
            return Err(TenantryError::validation_failed(
                format!("schema {} in pool {}", self.name, self.pool_id),
                format!(
                    "max units per schema must be positive, got {}",
                    self.max_units_per_schema
                ),
                "Set max_units_per_schema to a positive value",
            ));
        }

        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.current_units >= self.max_units_per_schema
    }

    pub fn remaining(&self) -> i64 {
        (self.max_units_per_schema - self.current_units).max(0)
    }
}

/// Validate a generated schema name
///
/// Names must start with an ASCII letter, contain only lowercase ASCII
/// letters, digits or '_', and fit the 63-byte identifier limit.
pub fn is_valid_schema_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_schema_name() {
        assert!(is_valid_schema_name("tenantdb_1_1"));
        assert!(is_valid_schema_name("s"));
        assert!(is_valid_schema_name("ctx_pool"));

        assert!(!is_valid_schema_name(""));
        assert!(!is_valid_schema_name("1schema")); // starts with digit
        assert!(!is_valid_schema_name("_schema")); // starts with underscore
        assert!(!is_valid_schema_name("Schema")); // uppercase
        assert!(!is_valid_schema_name("my-schema")); // dash
        assert!(!is_valid_schema_name(&"a".repeat(64)));
    }

    #[test]
    fn test_schema_record_capacity() {
        let record = SchemaRecord::from_load(PoolId(1), SchemaLoad::new("s1", 8), 10);
        assert!(record.validate().is_ok());
        assert!(!record.is_full());
        assert_eq!(record.remaining(), 2);

        let over = SchemaRecord::from_load(PoolId(1), SchemaLoad::new("s2", 12), 10);
        assert!(over.validate().is_ok());
        assert!(over.is_full());
        assert_eq!(over.remaining(), 0);
    }

    #[test]
    fn test_schema_record_rejects_negative_counts() {
        let record = SchemaRecord::from_load(PoolId(1), SchemaLoad::new("s1", -1), 10);
        assert!(record.validate().is_err());

        let record = SchemaRecord::from_load(PoolId(1), SchemaLoad::new("s1", 1), 0);
        assert!(record.validate().is_err());
    }
}
