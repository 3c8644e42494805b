//! One-shot wiring of registry, synchronizer, provider and reconciliation loop

use crate::config::Config;
use crate::error::{Result, TenantError};
use crate::pool::{Connector, TenantRegistry};
use crate::reconcile::{ReconcileEvent, ReconcileReport, Reconciler, TenantProvider};
use crate::schema::{AfterSyncHook, BeforeSyncHook, SchemaCatalog, SchemaSynchronizer};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct TenantPoolBuilder<C: Connector> {
    config: Config,
    connector: C,
    provider: Option<Arc<dyn TenantProvider>>,
    catalog: Arc<SchemaCatalog>,
    before: Option<Arc<dyn BeforeSyncHook<C::Connection>>>,
    after: Option<Arc<dyn AfterSyncHook<C::Connection>>>,
}

impl<C: Connector> TenantPoolBuilder<C> {
    pub fn new(config: Config, connector: C) -> Self {
        Self {
            config,
            connector,
            provider: None,
            catalog: Arc::new(SchemaCatalog::new()),
            before: None,
            after: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn TenantProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Share a catalog that other code keeps registering descriptors into
    pub fn catalog(mut self, catalog: Arc<SchemaCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn before_hook(mut self, hook: Arc<dyn BeforeSyncHook<C::Connection>>) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn after_hook(mut self, hook: Arc<dyn AfterSyncHook<C::Connection>>) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn build(self) -> Result<TenantPool<C>> {
        let provider = self.provider.ok_or_else(|| TenantError::Configuration {
            message: "tenant provider is not set".to_string(),
        })?;

        let mut synchronizer =
            SchemaSynchronizer::new(self.catalog).enabled(self.config.schema_sync_enabled);
        if let Some(hook) = self.before {
            synchronizer = synchronizer.with_before_hook(hook);
        }
        if let Some(hook) = self.after {
            synchronizer = synchronizer.with_after_hook(hook);
        }

        let registry = Arc::new(
            TenantRegistry::new(self.connector, synchronizer)
                .with_provision_timeout(self.config.provision_timeout),
        );

        let reconciler = Arc::new(
            Reconciler::new(registry.clone(), provider)
                .with_interval(self.config.reconcile_interval)
                .with_concurrency(self.config.reconcile_concurrency),
        );

        Ok(TenantPool {
            registry,
            reconciler,
            reconcile_enabled: self.config.reconcile_enabled,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }
}

pub struct TenantPool<C: Connector> {
    registry: Arc<TenantRegistry<C>>,
    reconciler: Arc<Reconciler<C>>,
    reconcile_enabled: bool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> TenantPool<C> {
    pub fn registry(&self) -> &Arc<TenantRegistry<C>> {
        &self.registry
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<C>> {
        &self.reconciler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.reconciler.subscribe()
    }

    /// Provision every tenant the provider knows about, then start the
    /// reconciliation loop if enabled.
    ///
    /// Tenants that fail to provision are reported, not fatal. A provider
    /// failure is returned, but the loop is still started so it can recover.
    pub async fn init(&self) -> Result<ReconcileReport> {
        let first_pass = self.reconciler.reconcile_once().await;

        if let Ok(report) = &first_pass {
            for (tenant_id, error) in &report.failed {
                warn!("Tenant {} unavailable after startup: {}", tenant_id, error);
            }
        }

        if self.reconcile_enabled {
            self.start_loop();
        }

        first_pass
    }

    fn start_loop(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return;
        }

        let reconciler = self.reconciler.clone();
        *task = Some(tokio::spawn(reconciler.run(self.cancel.child_token())));
    }

    pub fn is_reconciling(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and close every tenant connection
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!("Reconciliation task ended abnormally: {}", e);
            }
        }

        let closed = self.registry.close_all().await;
        info!("Tenant pool shut down, closed {} connections", closed);
    }
}
