use tenantry_core::PoolId;
use std::fmt;

/// Key encoder for catalog prefixes
pub struct KeyEncoder;

impl KeyEncoder {
    /// Prefix for scanning every pool record
    pub fn pools_prefix() -> &'static str {
        "pools/"
    }

    /// Prefix for scanning the schemas of one pool
    pub fn schemas_prefix(pool_id: PoolId) -> String {
        format!("schemas/{}/", pool_id)
    }

    /// Prefix for scanning every tenant row
    pub fn tenants_prefix() -> &'static str {
        "tenants/"
    }

    /// Parse a catalog key back into its typed form
    pub fn parse_key(key: &str) -> Option<CatalogKey> {
        let parts: Vec<&str> = key.split('/').collect();

        match parts.as_slice() {
            ["pools", id] => id.parse().ok().map(|id| CatalogKey::Pool {
                pool_id: PoolId(id),
            }),
            ["schemas", pool, name] if !name.is_empty() => {
                pool.parse().ok().map(|pool| CatalogKey::Schema {
                    pool_id: PoolId(pool),
                    name: name.to_string(),
                })
            }
            ["tenants", id] => id.parse().ok().map(|id| CatalogKey::Tenant { tenant_id: id }),
            ["seq", "schemas", pool] => pool.parse().ok().map(|pool| CatalogKey::SchemaSequence {
                pool_id: PoolId(pool),
            }),
            _ => None,
        }
    }
}

/// Typed keys of the provisioning catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogKey {
    /// Pool record: pools/{pool}
    Pool { pool_id: PoolId },
    /// Schema record: schemas/{pool}/{name}
    Schema { pool_id: PoolId, name: String },
    /// Tenant row: tenants/{tenant}
    Tenant { tenant_id: u64 },
    /// Next schema number for a pool: seq/schemas/{pool}
    SchemaSequence { pool_id: PoolId },
}

impl CatalogKey {
    pub fn pool(pool_id: PoolId) -> Self {
        Self::Pool { pool_id }
    }

    pub fn schema(pool_id: PoolId, name: impl Into<String>) -> Self {
        Self::Schema {
            pool_id,
            name: name.into(),
        }
    }

    pub fn tenant(tenant_id: u64) -> Self {
        Self::Tenant { tenant_id }
    }

    pub fn schema_sequence(pool_id: PoolId) -> Self {
        Self::SchemaSequence { pool_id }
    }

    /// Encode the key to a string
    pub fn encode(&self) -> String {
        match self {
            CatalogKey::Pool { pool_id } => format!("pools/{}", pool_id),
            CatalogKey::Schema { pool_id, name } => format!("schemas/{}/{}", pool_id, name),
            CatalogKey::Tenant { tenant_id } => format!("tenants/{}", tenant_id),
            CatalogKey::SchemaSequence { pool_id } => format!("seq/schemas/{}", pool_id),
        }
    }
}

impl fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
