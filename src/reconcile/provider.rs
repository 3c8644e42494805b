//! Tenant providers
//!
//! A provider returns the full desired tenant set on every call. There is no
//! delta protocol: whatever is missing from a snapshot is considered gone.

use crate::error::{Result, TenantError};
use crate::pool::create_pool;
use crate::tenant::{TenantCredentials, TenantInfo, TenantRecord};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait TenantProvider: Send + Sync {
    async fn fetch_tenants(&self) -> Result<Vec<TenantRecord>>;
}

/// Fixed tenant list, replaceable at runtime
#[derive(Debug, Default)]
pub struct StaticTenantProvider {
    tenants: RwLock<Vec<TenantRecord>>,
}

impl StaticTenantProvider {
    pub fn new(tenants: Vec<TenantRecord>) -> Self {
        Self {
            tenants: RwLock::new(tenants),
        }
    }

    pub fn replace(&self, tenants: Vec<TenantRecord>) {
        *self
            .tenants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tenants;
    }
}

#[async_trait]
impl TenantProvider for StaticTenantProvider {
    async fn fetch_tenants(&self) -> Result<Vec<TenantRecord>> {
        Ok(self
            .tenants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

/// JSON array of flat tenant records, re-read on every fetch
#[derive(Debug, Clone)]
pub struct JsonFileTenantProvider {
    path: PathBuf,
}

impl JsonFileTenantProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl TenantProvider for JsonFileTenantProvider {
    async fn fetch_tenants(&self) -> Result<Vec<TenantRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TenantError::Internal(format!("Failed to read tenants file {:?}: {}", self.path, e))
        })?;

        let tenants: Vec<TenantRecord> = serde_json::from_str(&content).map_err(|e| {
            TenantError::Internal(format!("Invalid tenants file {:?}: {}", self.path, e))
        })?;

        debug!("Read {} tenants from {:?}", tenants.len(), self.path);
        Ok(tenants)
    }
}

/// Tenant catalog table in a control database.
///
/// Expected columns: `tenant_id`, `host`, `port`, `db_user`, `db_password`,
/// `db_name`, `name`, `short_name`, `logo`, `type_code`, `extra` (jsonb).
pub struct PostgresTenantProvider {
    pool: Pool,
    query: String,
}

impl PostgresTenantProvider {
    pub fn new(pool: Pool, table: &str) -> Result<Self> {
        if !is_valid_identifier(table) {
            return Err(TenantError::Configuration {
                message: format!("Invalid tenant table name: {}", table),
            });
        }

        let query = format!(
            "SELECT tenant_id::text, host, port, db_user, db_password, db_name, \
             name, short_name, logo, type_code, extra \
             FROM {} ORDER BY tenant_id",
            table
        );

        Ok(Self { pool, query })
    }

    pub fn connect(database_url: &str, table: &str, timeout: Duration) -> Result<Self> {
        let pool = create_pool(database_url, 2, timeout)?;
        Self::new(pool, table)
    }
}

#[async_trait]
impl TenantProvider for PostgresTenantProvider {
    async fn fetch_tenants(&self) -> Result<Vec<TenantRecord>> {
        let client = self.pool.get().await?;
        let rows = client.query(self.query.as_str(), &[]).await?;

        let mut tenants = Vec::with_capacity(rows.len());
        for row in rows {
            let tenant_id: String = row.try_get(0)?;
            let port: i32 = row.try_get(2)?;
            let port = u16::try_from(port).map_err(|_| {
                TenantError::Internal(format!("Invalid port {} for tenant {}", port, tenant_id))
            })?;

            let credentials = TenantCredentials {
                tenant_id: tenant_id.into(),
                host: row.try_get(1)?,
                port,
                user: row.try_get(3)?,
                password: row.try_get(4)?,
                database: row.try_get(5)?,
            };

            let info = TenantInfo {
                name: optional_text(&row, 6)?,
                short_name: optional_text(&row, 7)?,
                logo: optional_text(&row, 8)?,
                type_code: optional_text(&row, 9)?,
                extra: row.try_get::<_, Option<Value>>(10)?.unwrap_or(Value::Null),
                ..Default::default()
            };

            tenants.push(TenantRecord::new(credentials, info));
        }

        Ok(tenants)
    }
}

fn optional_text(row: &tokio_postgres::Row, idx: usize) -> Result<String> {
    Ok(row.try_get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }

    name.len() <= 63
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
}
