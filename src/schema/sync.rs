//! Transactional schema synchronization
//!
//! Order of operations for one tenant connection:
//! 1. before-hook (no transaction yet; an error aborts with nothing changed)
//! 2. BEGIN, apply every descriptor of the catalog snapshot
//! 3. after-hook inside the same transaction
//! 4. COMMIT only if 2 and 3 succeeded, otherwise ROLLBACK

use crate::error::{Result, TenantError};
use crate::pool::{SchemaTransaction, TenantDatabase};
use crate::schema::SchemaCatalog;
use crate::tenant::TenantId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs before any schema change, outside the transaction.
#[async_trait]
pub trait BeforeSyncHook<D: TenantDatabase>: Send + Sync {
    async fn before_sync(&self, connection: &D, tenant_id: &TenantId) -> Result<()>;
}

/// Runs after all descriptors were applied, inside the same transaction.
#[async_trait]
pub trait AfterSyncHook<D: TenantDatabase>: Send + Sync {
    async fn after_sync(&self, transaction: &mut D::Transaction, tenant_id: &TenantId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Disabled,
    Applied { applied: usize, already_present: usize },
}

pub struct SchemaSynchronizer<D: TenantDatabase> {
    enabled: bool,
    catalog: Arc<SchemaCatalog>,
    before: Option<Arc<dyn BeforeSyncHook<D>>>,
    after: Option<Arc<dyn AfterSyncHook<D>>>,
}

impl<D: TenantDatabase> SchemaSynchronizer<D> {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            enabled: true,
            catalog,
            before: None,
            after: None,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_before_hook(mut self, hook: Arc<dyn BeforeSyncHook<D>>) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn with_after_hook(mut self, hook: Arc<dyn AfterSyncHook<D>>) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn sync(&self, connection: &D, tenant_id: &TenantId) -> Result<SyncOutcome> {
        if !self.enabled {
            debug!("Schema sync disabled, skipping tenant {}", tenant_id);
            return Ok(SyncOutcome::Disabled);
        }

        if let Some(hook) = &self.before {
            hook.before_sync(connection, tenant_id)
                .await
                .map_err(|e| stage_error(tenant_id, "before hook", e))?;
        }

        let descriptors = self.catalog.snapshot();

        let mut tx = connection
            .begin()
            .await
            .map_err(|e| stage_error(tenant_id, "begin", e))?;

        let mut applied = 0;
        let mut already_present = 0;

        for descriptor in &descriptors {
            match tx.apply(descriptor).await {
                Ok(true) => {
                    debug!("Applied descriptor {} to tenant {}", descriptor.name, tenant_id);
                    applied += 1;
                }
                Ok(false) => already_present += 1,
                Err(e) => {
                    rollback(tx, tenant_id).await;
                    return Err(stage_error(tenant_id, format!("apply {}", descriptor.name), e));
                }
            }
        }

        if let Some(hook) = &self.after {
            if let Err(e) = hook.after_sync(&mut tx, tenant_id).await {
                rollback(tx, tenant_id).await;
                return Err(stage_error(tenant_id, "after hook", e));
            }
        }

        tx.commit()
            .await
            .map_err(|e| stage_error(tenant_id, "commit", e))?;

        if applied > 0 {
            info!(
                "Schema sync for tenant {} applied {} descriptors ({} already present)",
                tenant_id, applied, already_present
            );
        }

        Ok(SyncOutcome::Applied {
            applied,
            already_present,
        })
    }
}

async fn rollback<T: SchemaTransaction>(tx: T, tenant_id: &TenantId) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed for tenant {}: {}", tenant_id, e);
    }
}

fn stage_error(tenant_id: &TenantId, stage: impl ToString, err: TenantError) -> TenantError {
    TenantError::schema_sync(tenant_id, stage, err.cause())
}
