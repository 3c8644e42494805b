mod health;
mod resolver;
mod tenants;

pub use health::health_check;
pub use resolver::{HeaderTenantResolver, TenantContext, TenantResolver};
pub use tenants::{current_tenant, list_tenants, reconcile_now};

use crate::bootstrap::TenantPool;
use crate::pool::Connector;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

pub struct ApiState<C: Connector> {
    pub pool: Arc<TenantPool<C>>,
    pub resolver: Arc<dyn TenantResolver>,
    pub started_at: Instant,
}

impl<C: Connector> ApiState<C> {
    pub fn new(pool: Arc<TenantPool<C>>, resolver: Arc<dyn TenantResolver>) -> Self {
        Self {
            pool,
            resolver,
            started_at: Instant::now(),
        }
    }
}

impl<C: Connector> Clone for ApiState<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            resolver: self.resolver.clone(),
            started_at: self.started_at,
        }
    }
}

pub fn router<C: Connector>(state: ApiState<C>) -> Router {
    Router::new()
        .route("/health", get(health_check::<C>))
        .route("/tenants", get(list_tenants::<C>))
        .route("/tenant/info", get(current_tenant::<C>))
        .route("/admin/reconcile", post(reconcile_now::<C>))
        .with_state(state)
}
