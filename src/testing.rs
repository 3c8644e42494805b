//! In-memory engine for unit tests
//!
//! Records what each tenant database saw: opens, closes, transactions and the
//! descriptors that survived a commit.

use crate::error::{Result, TenantError};
use crate::pool::{Connector, SchemaTransaction, TenantDatabase};
use crate::schema::SchemaDescriptor;
use crate::tenant::{TenantCredentials, TenantId, TenantInfo, TenantRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct TenantState {
    committed: Vec<String>,
    statements: Vec<String>,
    opens: usize,
    closes: usize,
    begins: usize,
    commits: usize,
    rollbacks: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    tenants: HashMap<TenantId, TenantState>,
    failing_descriptors: HashSet<String>,
    failing_tenants: HashSet<TenantId>,
}

#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
    serial: Arc<AtomicUsize>,
    connect_delay: Arc<Mutex<Duration>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a tenant without going through `connect`
    pub fn database(&self, tenant_id: &str) -> MemoryDatabase {
        MemoryDatabase {
            tenant_id: tenant_id.into(),
            serial: self.serial.fetch_add(1, Ordering::SeqCst),
            closed: Arc::new(AtomicBool::new(false)),
            state: self.state.clone(),
        }
    }

    pub fn fail_descriptor(&self, name: &str) {
        self.lock().failing_descriptors.insert(name.to_string());
    }

    pub fn fail_connect(&self, tenant_id: &str) {
        self.lock().failing_tenants.insert(tenant_id.into());
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_descriptors.clear();
        state.failing_tenants.clear();
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn committed(&self, tenant_id: &str) -> Vec<String> {
        self.read(tenant_id, |t| t.committed.clone())
    }

    pub fn statements(&self, tenant_id: &str) -> Vec<String> {
        self.read(tenant_id, |t| t.statements.clone())
    }

    pub fn opens(&self, tenant_id: &str) -> usize {
        self.read(tenant_id, |t| t.opens)
    }

    pub fn closes(&self, tenant_id: &str) -> usize {
        self.read(tenant_id, |t| t.closes)
    }

    pub fn begins(&self, tenant_id: &str) -> usize {
        self.read(tenant_id, |t| t.begins)
    }

    pub fn commits(&self, tenant_id: &str) -> usize {
        self.read(tenant_id, |t| t.commits)
    }

    pub fn rollbacks(&self, tenant_id: &str) -> usize {
        self.read(tenant_id, |t| t.rollbacks)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    fn read<T: Default>(&self, tenant_id: &str, f: impl FnOnce(&TenantState) -> T) -> T {
        self.lock()
            .tenants
            .get(&TenantId::from(tenant_id))
            .map(f)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryEngine {
    type Connection = MemoryDatabase;

    async fn connect(&self, credentials: &TenantCredentials) -> Result<MemoryDatabase> {
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.lock();
            if state.failing_tenants.contains(&credentials.tenant_id) {
                return Err(TenantError::connection(&credentials.tenant_id, "connection refused"));
            }
            state
                .tenants
                .entry(credentials.tenant_id.clone())
                .or_default()
                .opens += 1;
        }

        Ok(self.database(credentials.tenant_id.as_str()))
    }
}

#[derive(Clone)]
pub struct MemoryDatabase {
    tenant_id: TenantId,
    serial: usize,
    closed: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
}

impl MemoryDatabase {
    /// Distinguishes handles from separate opens
    pub fn serial(&self) -> usize {
        self.serial
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantDatabase for MemoryDatabase {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        self.state
            .lock()
            .unwrap()
            .tenants
            .entry(self.tenant_id.clone())
            .or_default()
            .begins += 1;

        Ok(MemoryTransaction {
            tenant_id: self.tenant_id.clone(),
            descriptors: Vec::new(),
            statements: Vec::new(),
            state: self.state.clone(),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .tenants
            .entry(self.tenant_id.clone())
            .or_default()
            .closes += 1;
    }
}

pub struct MemoryTransaction {
    tenant_id: TenantId,
    descriptors: Vec<String>,
    statements: Vec<String>,
    state: Arc<Mutex<EngineState>>,
}

#[async_trait]
impl SchemaTransaction for MemoryTransaction {
    async fn apply(&mut self, descriptor: &SchemaDescriptor) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.failing_descriptors.contains(&descriptor.name) {
            return Err(TenantError::Internal(format!(
                "relation {} could not be created",
                descriptor.name
            )));
        }

        let already = state
            .tenants
            .get(&self.tenant_id)
            .is_some_and(|t| t.committed.contains(&descriptor.name));
        drop(state);

        if already {
            return Ok(false);
        }
        self.descriptors.push(descriptor.name.clone());
        Ok(true)
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let tenant = state.tenants.entry(self.tenant_id.clone()).or_default();
        tenant.committed.extend(self.descriptors);
        tenant.statements.extend(self.statements);
        tenant.commits += 1;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .tenants
            .entry(self.tenant_id.clone())
            .or_default()
            .rollbacks += 1;
        Ok(())
    }
}

pub fn record(tenant_id: &str, password: &str, name: &str) -> TenantRecord {
    TenantRecord::new(
        TenantCredentials {
            tenant_id: tenant_id.into(),
            host: "db.internal".to_string(),
            port: 5432,
            user: format!("tenant_{}", tenant_id),
            password: password.to_string(),
            database: format!("tenant_{}", tenant_id),
        },
        TenantInfo {
            name: name.to_string(),
            short_name: name.chars().take(3).collect(),
            type_code: "school".to_string(),
            ..Default::default()
        },
    )
}
