//! Reconciliation loop
//!
//! One pass:
//! 1. fetch the desired tenant set from the provider
//! 2. remove registered tenants missing from it
//! 3. refresh metadata of tenants that stay
//! 4. `add` every desired tenant (unchanged ones take the fast path)
//!
//! A failing tenant never stops the pass. Failures are logged and published as
//! events.

use crate::error::Result;
use crate::pool::{AddOutcome, Connector, TenantRegistry};
use crate::reconcile::TenantProvider;
use crate::tenant::{TenantId, TenantRecord};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    Provisioned { tenant_id: TenantId },
    Reprovisioned { tenant_id: TenantId },
    InfoUpdated { tenant_id: TenantId },
    Removed { tenant_id: TenantId },
    ProvisionFailed { tenant_id: TenantId, error: String },
    ProviderFailed { error: String },
}

/// Summary of one pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub desired: usize,
    pub provisioned: Vec<TenantId>,
    pub reprovisioned: Vec<TenantId>,
    pub info_updated: Vec<TenantId>,
    pub removed: Vec<TenantId>,
    pub unchanged: usize,
    pub failed: Vec<(TenantId, String)>,
    pub finished_at: DateTime<Utc>,
}

pub struct Reconciler<C: Connector> {
    registry: Arc<TenantRegistry<C>>,
    provider: Arc<dyn TenantProvider>,
    interval: Duration,
    concurrency: usize,
    events: broadcast::Sender<ReconcileEvent>,
}

impl<C: Connector> Reconciler<C> {
    pub fn new(registry: Arc<TenantRegistry<C>>, provider: Arc<dyn TenantProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            provider,
            interval: Duration::from_secs(5 * 60),
            concurrency: 4,
            events,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<TenantRegistry<C>> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.events.subscribe()
    }

    /// Run one pass. Only a provider failure is returned as an error, and in
    /// that case the registry is left untouched.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let fetched = match self.provider.fetch_tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!("Tenant provider failed, skipping reconciliation: {}", e);
                self.emit(ReconcileEvent::ProviderFailed { error: e.to_string() });
                return Err(e);
            }
        };

        let desired = dedupe(fetched);

        let mut report = ReconcileReport {
            desired: desired.len(),
            ..Default::default()
        };

        let stale: Vec<TenantId> = {
            let desired_ids: HashSet<&TenantId> = desired.iter().map(|r| r.tenant_id()).collect();
            self.registry
                .tenant_ids()
                .into_iter()
                .filter(|id| !desired_ids.contains(id))
                .collect()
        };

        for tenant_id in stale {
            if self.registry.remove(&tenant_id).await.is_some() {
                self.emit(ReconcileEvent::Removed {
                    tenant_id: tenant_id.clone(),
                });
                report.removed.push(tenant_id);
            }
        }

        for record in &desired {
            if self.registry.update_info(record.info.clone()) {
                let tenant_id = record.tenant_id().clone();
                self.emit(ReconcileEvent::InfoUpdated {
                    tenant_id: tenant_id.clone(),
                });
                report.info_updated.push(tenant_id);
            }
        }

        let registry = self.registry.clone();
        let outcomes: Vec<_> = stream::iter(desired)
            .map(move |record| {
                let registry = registry.clone();
                async move {
                    let tenant_id = record.tenant_id().clone();
                    (tenant_id, registry.add_record(record).await)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (tenant_id, outcome) in outcomes {
            match outcome {
                Ok(AddOutcome::Unchanged) => report.unchanged += 1,
                Ok(AddOutcome::Provisioned) => {
                    self.emit(ReconcileEvent::Provisioned {
                        tenant_id: tenant_id.clone(),
                    });
                    report.provisioned.push(tenant_id);
                }
                Ok(AddOutcome::Reprovisioned) => {
                    self.emit(ReconcileEvent::Reprovisioned {
                        tenant_id: tenant_id.clone(),
                    });
                    report.reprovisioned.push(tenant_id);
                }
                Err(e) => {
                    warn!("Failed to provision tenant {}: {}", tenant_id, e);
                    self.emit(ReconcileEvent::ProvisionFailed {
                        tenant_id: tenant_id.clone(),
                        error: e.to_string(),
                    });
                    report.failed.push((tenant_id, e.to_string()));
                }
            }
        }

        report.finished_at = Utc::now();

        info!(
            "Reconciled {} tenants: {} provisioned, {} reprovisioned, {} updated, {} removed, {} failed",
            report.desired,
            report.provisioned.len(),
            report.reprovisioned.len(),
            report.info_updated.len(),
            report.removed.len(),
            report.failed.len()
        );

        Ok(report)
    }

    /// Reconcile every interval until `cancel` fires. The first pass runs one
    /// interval after the call; run `reconcile_once` first for an immediate one.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Reconciliation loop started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            // Errors are already logged and published
            let _ = self.reconcile_once().await;
        }

        info!("Reconciliation loop stopped");
    }

    fn emit(&self, event: ReconcileEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Keep one record per tenant id. A later duplicate replaces the earlier one
/// in place.
fn dedupe(records: Vec<TenantRecord>) -> Vec<TenantRecord> {
    let mut positions: HashMap<TenantId, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<TenantRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(record.tenant_id()) {
            Some(&idx) => {
                debug!("Provider returned tenant {} more than once", record.tenant_id());
                unique[idx] = record;
            }
            None => {
                positions.insert(record.tenant_id().clone(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenantError;
    use crate::reconcile::StaticTenantProvider;
    use crate::schema::{SchemaCatalog, SchemaDescriptor, SchemaSynchronizer};
    use crate::testing::{record, MemoryEngine};
    use async_trait::async_trait;

    struct Fixture {
        engine: MemoryEngine,
        provider: Arc<StaticTenantProvider>,
        reconciler: Reconciler<MemoryEngine>,
    }

    fn fixture(tenants: Vec<TenantRecord>) -> Fixture {
        let engine = MemoryEngine::new();
        let catalog = SchemaCatalog::new();
        catalog
            .register(SchemaDescriptor::new("users", "CREATE TABLE users (id INT)"))
            .unwrap();
        let registry = Arc::new(TenantRegistry::new(
            engine.clone(),
            SchemaSynchronizer::new(Arc::new(catalog)),
        ));
        let provider = Arc::new(StaticTenantProvider::new(tenants));
        let reconciler = Reconciler::new(registry, provider.clone());
        Fixture {
            engine,
            provider,
            reconciler,
        }
    }

    fn sorted_ids(registry: &TenantRegistry<MemoryEngine>) -> Vec<String> {
        let mut ids: Vec<String> = registry.tenant_ids().iter().map(|id| id.to_string()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_converges_to_provider_set() {
        let f = fixture(vec![record("1", "pw", "North"), record("2", "pw", "South")]);
        let registry = f.reconciler.registry().clone();

        let report = f.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.provisioned.len(), 2);
        assert!(registry.get(&"1".into()).is_some());
        assert!(registry.get(&"2".into()).is_some());
        assert!(matches!(
            registry.get_or_err(&"3".into()),
            Err(TenantError::TenantNotFound { .. })
        ));
        let tenant_two = registry.get(&"2".into()).unwrap();

        f.provider
            .replace(vec![record("2", "pw", "South"), record("3", "pw", "East")]);
        let report = f.reconciler.reconcile_once().await.unwrap();

        assert_eq!(report.removed, vec![TenantId::from("1")]);
        assert_eq!(report.provisioned, vec![TenantId::from("3")]);
        assert_eq!(report.unchanged, 1);
        assert_eq!(sorted_ids(&registry), vec!["2", "3"]);
        assert!(registry.get(&"1".into()).is_none());
        assert_eq!(registry.get(&"2".into()).unwrap().serial(), tenant_two.serial());
        assert_eq!(f.engine.closes("1"), 1);
    }

    #[tokio::test]
    async fn test_metadata_refresh_without_reconnect() {
        let f = fixture(vec![record("1", "pw", "North")]);
        let registry = f.reconciler.registry().clone();
        f.reconciler.reconcile_once().await.unwrap();

        f.provider.replace(vec![record("1", "pw", "North Campus")]);
        let report = f.reconciler.reconcile_once().await.unwrap();

        assert_eq!(report.info_updated, vec![TenantId::from("1")]);
        assert_eq!(report.unchanged, 1);
        assert_eq!(registry.tenant_info(&"1".into()).unwrap().name, "North Campus");
        assert_eq!(f.engine.opens("1"), 1);
    }

    #[tokio::test]
    async fn test_password_change_reprovisions() {
        let f = fixture(vec![record("1", "pw", "North")]);
        f.reconciler.reconcile_once().await.unwrap();

        f.provider.replace(vec![record("1", "rotated", "North")]);
        let report = f.reconciler.reconcile_once().await.unwrap();

        assert_eq!(report.reprovisioned, vec![TenantId::from("1")]);
        assert_eq!(f.engine.opens("1"), 2);
        assert_eq!(f.engine.closes("1"), 1);
    }

    #[tokio::test]
    async fn test_failing_tenant_does_not_stop_pass() {
        let f = fixture(vec![
            record("1", "pw", "North"),
            record("2", "pw", "South"),
            record("3", "pw", "East"),
        ]);
        f.engine.fail_connect("2");
        let mut events = f.reconciler.subscribe();

        let report = f.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.provisioned.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, TenantId::from("2"));
        assert_eq!(sorted_ids(f.reconciler.registry()), vec!["1", "3"]);

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if let ReconcileEvent::ProvisionFailed { tenant_id, .. } = event {
                assert_eq!(tenant_id, TenantId::from("2"));
                failures += 1;
            }
        }
        assert_eq!(failures, 1);

        // The next pass picks the tenant up once it recovers
        f.engine.heal();
        let report = f.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.provisioned, vec![TenantId::from("2")]);
    }

    struct BrokenProvider;

    #[async_trait]
    impl TenantProvider for BrokenProvider {
        async fn fetch_tenants(&self) -> Result<Vec<TenantRecord>> {
            Err(TenantError::Internal("catalog unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_registry_alone() {
        let f = fixture(vec![record("1", "pw", "North")]);
        f.reconciler.reconcile_once().await.unwrap();

        let broken = Reconciler::new(f.reconciler.registry().clone(), Arc::new(BrokenProvider));
        let mut events = broken.subscribe();
        assert!(broken.reconcile_once().await.is_err());

        assert!(f.reconciler.registry().contains(&"1".into()));
        assert!(matches!(
            events.try_recv(),
            Ok(ReconcileEvent::ProviderFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_tenant_reappears_after_removal() {
        let f = fixture(vec![record("1", "pw", "North")]);
        f.reconciler.reconcile_once().await.unwrap();

        f.provider.replace(vec![]);
        f.reconciler.reconcile_once().await.unwrap();
        assert!(f.reconciler.registry().is_empty());

        f.provider.replace(vec![record("1", "pw", "North")]);
        let report = f.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.provisioned, vec![TenantId::from("1")]);
        assert_eq!(f.engine.opens("1"), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture(vec![record("1", "pw", "North")]);
        let reconciler = Arc::new(f.reconciler.with_interval(Duration::from_millis(10)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(reconciler.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(reconciler.registry().contains(&"1".into()));
    }

    #[test]
    fn test_dedupe_keeps_last_in_first_position() {
        let records = dedupe(vec![
            record("1", "old", "North"),
            record("2", "pw", "South"),
            record("1", "new", "North"),
        ]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tenant_id().as_str(), "1");
        assert_eq!(records[0].credentials.password, "new");
    }
}
