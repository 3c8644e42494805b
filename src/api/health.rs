use crate::api::ApiState;
use crate::pool::Connector;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    tenants: usize,
    reconciling: bool,
    schema_sync_enabled: bool,
    schema_descriptors: usize,
    uptime_seconds: u64,
}

pub async fn health_check<C: Connector>(State(state): State<ApiState<C>>) -> Json<HealthResponse> {
    let registry = state.pool.registry();
    let reconciling = state.pool.is_reconciling();

    Json(HealthResponse {
        status: if registry.is_empty() {
            "degraded".to_string()
        } else {
            "healthy".to_string()
        },
        tenants: registry.len(),
        reconciling,
        schema_sync_enabled: registry.synchronizer().is_enabled(),
        schema_descriptors: registry.synchronizer().catalog().len(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
