use crate::{Result, TenantryError};
use serde::{Deserialize, Serialize};

/// Configuration for tenant placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Cluster-wide cap on tenants per schema
    pub max_units_per_schema: i64,
    /// Prefix for generated schema names (`{prefix}_{pool}_{n}`)
    pub schema_prefix: String,
    /// Assign/commit rounds a provisioner runs before giving up
    pub max_attempts: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            max_units_per_schema: 1000,
            schema_prefix: "tenantdb".to_string(),
            max_attempts: 3,
        }
    }
}

impl PlacementConfig {
    /// Parse a YAML document and validate it
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let config: Self = crate::from_yaml(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document and validate it
    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: Self = crate::from_json(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_units_per_schema <= 0 {
            return Err(TenantryError::invalid_config(
                format!(
                    "max_units_per_schema must be positive, got {}",
                    self.max_units_per_schema
                ),
                "Set max_units_per_schema to the number of tenants one schema may hold",
            ));
        }

        if self.max_attempts == 0 {
            return Err(TenantryError::invalid_config(
                "max_attempts must be at least 1",
                "Set max_attempts to 1 to disable retries",
            ));
        }

        let probe = format!("{}_1_1", self.schema_prefix);
        if !crate::is_valid_schema_name(&probe) {
            return Err(TenantryError::invalid_config(
                format!("schema_prefix '{}' produces invalid schema names", self.schema_prefix),
                "Use lowercase letters, digits and '_', starting with a letter",
            ));
        }

        Ok(())
    }
}
