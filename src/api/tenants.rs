use crate::api::{ApiState, TenantContext};
use crate::error::Result;
use crate::pool::Connector;
use crate::reconcile::ReconcileReport;
use crate::tenant::TenantInfo;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ListTenantsResponse {
    pub tenants: Vec<TenantInfo>,
    pub count: usize,
}

pub async fn list_tenants<C: Connector>(State(state): State<ApiState<C>>) -> Json<ListTenantsResponse> {
    let mut tenants = state.pool.registry().all_tenant_info();
    tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));

    Json(ListTenantsResponse {
        count: tenants.len(),
        tenants,
    })
}

pub async fn current_tenant<C: Connector>(context: TenantContext<C::Connection>) -> Json<TenantInfo> {
    Json(context.info)
}

/// Run a reconciliation pass now instead of waiting for the next interval
pub async fn reconcile_now<C: Connector>(State(state): State<ApiState<C>>) -> Result<Json<ReconcileReport>> {
    let report = state.pool.reconciler().reconcile_once().await?;
    Ok(Json(report))
}
