mod provider;
mod reconciler;

pub use provider::{JsonFileTenantProvider, PostgresTenantProvider, StaticTenantProvider, TenantProvider};
pub use reconciler::{ReconcileEvent, ReconcileReport, Reconciler};
