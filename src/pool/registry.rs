use crate::error::{Result, TenantError};
use crate::pool::engine::{Connector, TenantDatabase};
use crate::schema::SchemaSynchronizer;
use crate::tenant::{TenantCredentials, TenantId, TenantInfo, TenantRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(30);

struct RegistryEntry<D> {
    credentials: TenantCredentials,
    info: TenantInfo,
    connection: D,
    provisioned_at: DateTime<Utc>,
}

/// What `add` did for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Credentials unchanged, existing connection kept
    Unchanged,
    /// First connection for this tenant
    Provisioned,
    /// Credentials changed, connection rebuilt and the old one closed
    Reprovisioned,
}

/// Live connections keyed by tenant.
///
/// An entry only becomes visible after its connection was opened and its schema
/// synced. Provisioning work for one tenant is serialized through a per-tenant
/// lock; different tenants provision concurrently.
pub struct TenantRegistry<C: Connector> {
    connector: C,
    synchronizer: SchemaSynchronizer<C::Connection>,
    entries: DashMap<TenantId, RegistryEntry<C::Connection>>,
    provisioning: DashMap<TenantId, Arc<Mutex<()>>>,
    provision_timeout: Duration,
}

impl<C: Connector> TenantRegistry<C> {
    pub fn new(connector: C, synchronizer: SchemaSynchronizer<C::Connection>) -> Self {
        Self {
            connector,
            synchronizer,
            entries: DashMap::new(),
            provisioning: DashMap::new(),
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
        }
    }

    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    pub fn synchronizer(&self) -> &SchemaSynchronizer<C::Connection> {
        &self.synchronizer
    }

    /// Connection for a tenant, if one is registered. Never does I/O.
    pub fn get(&self, tenant_id: &TenantId) -> Option<C::Connection> {
        self.entries.get(tenant_id).map(|entry| entry.connection.clone())
    }

    pub fn get_or_err(&self, tenant_id: &TenantId) -> Result<C::Connection> {
        self.get(tenant_id)
            .ok_or_else(|| TenantError::not_found(tenant_id))
    }

    pub fn contains(&self, tenant_id: &TenantId) -> bool {
        self.entries.contains_key(tenant_id)
    }

    pub fn tenant_info(&self, tenant_id: &TenantId) -> Option<TenantInfo> {
        self.entries.get(tenant_id).map(|entry| entry.info.clone())
    }

    pub fn provisioned_at(&self, tenant_id: &TenantId) -> Option<DateTime<Utc>> {
        self.entries.get(tenant_id).map(|entry| entry.provisioned_at)
    }

    /// Snapshot of every tenant's metadata, in no particular order
    pub fn all_tenant_info(&self) -> Vec<TenantInfo> {
        self.entries.iter().map(|entry| entry.info.clone()).collect()
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn add_record(&self, record: TenantRecord) -> Result<AddOutcome> {
        self.add(record.credentials, record.info).await
    }

    /// Register a tenant, or rebuild its connection when the credentials changed.
    ///
    /// Identical credentials take the fast path: no connection is opened and no
    /// schema sync runs. On failure the previous entry, if any, stays in place.
    pub async fn add(&self, credentials: TenantCredentials, info: TenantInfo) -> Result<AddOutcome> {
        let tenant_id = credentials.tenant_id.clone();
        let result = {
            let lock = self.tenant_lock(&tenant_id);
            let _guard = lock.lock().await;
            self.add_locked(credentials, info).await
        };

        // A tenant that never got an entry keeps no provisioning lock behind
        if result.is_err() && !self.entries.contains_key(&tenant_id) {
            self.release_lock(&tenant_id);
        }

        result
    }

    async fn add_locked(&self, credentials: TenantCredentials, mut info: TenantInfo) -> Result<AddOutcome> {
        let tenant_id = credentials.tenant_id.clone();

        let unchanged = self
            .entries
            .get(&tenant_id)
            .is_some_and(|entry| entry.credentials == credentials);
        if unchanged {
            debug!("Tenant {} already provisioned with current credentials", tenant_id);
            return Ok(AddOutcome::Unchanged);
        }

        let connection = self.provision(&credentials).await?;

        info.tenant_id = tenant_id.clone();
        let previous = self.entries.insert(
            tenant_id.clone(),
            RegistryEntry {
                credentials,
                info,
                connection,
                provisioned_at: Utc::now(),
            },
        );

        match previous {
            Some(old) => {
                old.connection.close().await;
                info!("Reprovisioned tenant {} with new credentials", tenant_id);
                Ok(AddOutcome::Reprovisioned)
            }
            None => {
                info!("Provisioned tenant {}", tenant_id);
                Ok(AddOutcome::Provisioned)
            }
        }
    }

    /// Drop a tenant and close its connection. Returns the removed metadata.
    pub async fn remove(&self, tenant_id: &TenantId) -> Option<TenantInfo> {
        let removed = {
            let lock = self.tenant_lock(tenant_id);
            let _guard = lock.lock().await;
            self.entries.remove(tenant_id).map(|(_, entry)| entry)
        };

        self.release_lock(tenant_id);

        let entry = removed?;
        entry.connection.close().await;
        info!("Removed tenant {}", tenant_id);
        Some(entry.info)
    }

    /// Overwrite a tenant's metadata in place when any observable field
    /// changed. Returns true if the entry was updated.
    pub fn update_info(&self, info: TenantInfo) -> bool {
        match self.entries.get_mut(&info.tenant_id) {
            Some(mut entry) if entry.info.differs_from(&info) => {
                debug!("Updated metadata for tenant {}", info.tenant_id);
                entry.info = info;
                true
            }
            _ => false,
        }
    }

    /// Remove every tenant, closing all connections
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for tenant_id in self.tenant_ids() {
            if self.remove(&tenant_id).await.is_some() {
                closed += 1;
            }
        }
        closed
    }

    /// Open and sync a connection within the provisioning deadline. A connection
    /// that was opened is closed again on any failure, expiry included.
    async fn provision(&self, credentials: &TenantCredentials) -> Result<C::Connection> {
        let tenant_id = &credentials.tenant_id;
        let deadline = Instant::now() + self.provision_timeout;

        let connection = match timeout_at(deadline, self.connector.connect(credentials)).await {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out(tenant_id)),
        };

        let synced = match timeout_at(deadline, self.synchronizer.sync(&connection, tenant_id)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(self.timed_out(tenant_id)),
        };

        if let Err(e) = synced {
            connection.close().await;
            return Err(e);
        }

        Ok(connection)
    }

    fn timed_out(&self, tenant_id: &TenantId) -> TenantError {
        TenantError::connection(
            tenant_id,
            format!("provisioning timed out after {:?}", self.provision_timeout),
        )
    }

    fn tenant_lock(&self, tenant_id: &TenantId) -> Arc<Mutex<()>> {
        self.provisioning
            .entry(tenant_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the provisioning lock unless someone is holding or waiting on it
    fn release_lock(&self, tenant_id: &TenantId) {
        self.provisioning
            .remove_if(tenant_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
