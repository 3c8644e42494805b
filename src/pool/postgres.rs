use crate::error::{Result, TenantError};
use crate::pool::engine::{Connector, SchemaTransaction, TenantDatabase};
use crate::schema::SchemaDescriptor;
use crate::tenant::{TenantCredentials, TenantId};
use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, Object, Pool, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

const DESCRIPTOR_TABLE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS _tenantdb_schema_descriptors (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        checksum TEXT NOT NULL,
        applied_at TIMESTAMPTZ DEFAULT NOW()
    )
"#;

/// Opens one deadpool pool per tenant database.
#[derive(Debug, Clone)]
pub struct PgConnector {
    max_connections: u32,
    timeout: Duration,
}

impl PgConnector {
    pub fn new(max_connections: u32, timeout: Duration) -> Self {
        Self {
            max_connections,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgTenantDatabase;

    async fn connect(&self, credentials: &TenantCredentials) -> Result<PgTenantDatabase> {
        let tenant_id = &credentials.tenant_id;
        let pool = create_pool(&credentials.dsn(), self.max_connections, self.timeout)
            .map_err(|e| TenantError::connection(tenant_id, e.cause()))?;

        let client = pool
            .get()
            .await
            .map_err(|e| TenantError::connection(tenant_id, e))?;

        client
            .execute("SELECT 1", &[])
            .await
            .map_err(|e| TenantError::connection(tenant_id, format!("Ping failed: {}", e)))?;

        info!(
            "Connected to database {} on {}:{} for tenant {}",
            credentials.database, credentials.host, credentials.port, tenant_id
        );

        Ok(PgTenantDatabase {
            tenant_id: tenant_id.clone(),
            pool,
        })
    }
}

/// Pooled handle to one tenant database
#[derive(Clone)]
pub struct PgTenantDatabase {
    tenant_id: TenantId,
    pool: Pool,
}

impl PgTenantDatabase {
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| TenantError::connection(&self.tenant_id, e))
    }
}

#[async_trait]
impl TenantDatabase for PgTenantDatabase {
    type Transaction = PgSchemaTransaction;

    async fn begin(&self) -> Result<PgSchemaTransaction> {
        let client = self.client().await?;

        client.batch_execute("BEGIN").await?;

        let mut tx = PgSchemaTransaction {
            tenant_id: self.tenant_id.clone(),
            client: Some(client),
        };
        tx.execute(DESCRIPTOR_TABLE_DDL).await?;

        Ok(tx)
    }

    async fn close(&self) {
        self.pool.close();
        debug!("Closed pool for tenant {}", self.tenant_id);
    }
}

/// Explicit BEGIN/COMMIT on a single pooled client.
///
/// The client is owned rather than borrowed so the transaction can cross
/// await points freely. An unfinished transaction detaches its client on drop.
pub struct PgSchemaTransaction {
    tenant_id: TenantId,
    client: Option<Object>,
}

impl PgSchemaTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| TenantError::Internal("transaction already finished".to_string()))
    }

    async fn finish(mut self, statement: &str) -> Result<()> {
        let client = match self.client.take() {
            Some(client) => client,
            None => return Ok(()),
        };

        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Connection state is unknown, never hand it back to the pool
                let _ = Object::take(client);
                Err(TenantError::schema_sync(&self.tenant_id, statement.to_lowercase(), e))
            }
        }
    }
}

#[async_trait]
impl SchemaTransaction for PgSchemaTransaction {
    async fn apply(&mut self, descriptor: &SchemaDescriptor) -> Result<bool> {
        let client = self.client()?;

        let row = client
            .query_opt(
                "SELECT checksum FROM _tenantdb_schema_descriptors WHERE name = $1",
                &[&descriptor.name],
            )
            .await?;

        if let Some(row) = row {
            let stored: String = row.get(0);
            if stored != descriptor.checksum {
                warn!(
                    "Descriptor {} changed since it was applied to tenant {}: stored={}, current={}",
                    descriptor.name, self.tenant_id, stored, descriptor.checksum
                );
            }
            return Ok(false);
        }

        client.batch_execute(&descriptor.sql).await?;

        client
            .execute(
                "INSERT INTO _tenantdb_schema_descriptors (name, checksum) VALUES ($1, $2)",
                &[&descriptor.name, &descriptor.checksum],
            )
            .await?;

        Ok(true)
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgSchemaTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            warn!("Transaction for tenant {} dropped while open, discarding its connection", self.tenant_id);
            let _ = Object::take(client);
        }
    }
}

pub(crate) fn create_pool(database_url: &str, max_size: u32, timeout: Duration) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());

    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: max_size as usize,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(timeout),
            create: Some(timeout),
            recycle: Some(timeout),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| TenantError::Internal(format!("Failed to create pool: {}", e)))
}
