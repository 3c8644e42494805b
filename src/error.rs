use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed for tenant {tenant_id}: {cause}")]
    ConnectionFailed { tenant_id: String, cause: String },

    #[error("Schema sync failed for tenant {tenant_id} during {stage}: {cause}")]
    SchemaSyncFailed {
        tenant_id: String,
        stage: String,
        cause: String,
    },

    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: String },

    #[error("Could not resolve tenant: {message}")]
    ResolutionFailed { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TenantError {
    pub fn connection(tenant_id: impl ToString, cause: impl ToString) -> Self {
        TenantError::ConnectionFailed {
            tenant_id: tenant_id.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn schema_sync(tenant_id: impl ToString, stage: impl ToString, cause: impl ToString) -> Self {
        TenantError::SchemaSyncFailed {
            tenant_id: tenant_id.to_string(),
            stage: stage.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn not_found(tenant_id: impl ToString) -> Self {
        TenantError::TenantNotFound {
            tenant_id: tenant_id.to_string(),
        }
    }

    /// Cause without the variant prefix, for attaching to an error of another kind.
    pub fn cause(&self) -> String {
        match self {
            TenantError::Configuration { message } => message.clone(),
            TenantError::ConnectionFailed { cause, .. } => cause.clone(),
            TenantError::SchemaSyncFailed { cause, .. } => cause.clone(),
            TenantError::TenantNotFound { tenant_id } => format!("tenant {} not found", tenant_id),
            TenantError::ResolutionFailed { message } => message.clone(),
            TenantError::Internal(msg) => msg.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            TenantError::Configuration { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "configuration_error".to_string(),
                    message: message.clone(),
                    tenant_id: None,
                    cause: None,
                },
            ),
            TenantError::ConnectionFailed { tenant_id, cause } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: "connection_failed".to_string(),
                    message: format!("Failed to connect to database of tenant '{}'", tenant_id),
                    tenant_id: Some(tenant_id.clone()),
                    cause: Some(cause.clone()),
                },
            ),
            TenantError::SchemaSyncFailed {
                tenant_id,
                stage,
                cause,
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "schema_sync_failed".to_string(),
                    message: format!("Schema sync failed during {}", stage),
                    tenant_id: Some(tenant_id.clone()),
                    cause: Some(cause.clone()),
                },
            ),
            // Reported to callers as access denied
            TenantError::TenantNotFound { tenant_id } => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: "tenant_unavailable".to_string(),
                    message: format!("Tenant '{}' is not available", tenant_id),
                    tenant_id: Some(tenant_id.clone()),
                    cause: None,
                },
            ),
            TenantError::ResolutionFailed { message } => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: "tenant_unresolved".to_string(),
                    message: message.clone(),
                    tenant_id: None,
                    cause: None,
                },
            ),
            TenantError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "internal_error".to_string(),
                    message: msg.clone(),
                    tenant_id: None,
                    cause: None,
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<tokio_postgres::Error> for TenantError {
    fn from(err: tokio_postgres::Error) -> Self {
        TenantError::Internal(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for TenantError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        TenantError::Internal(format!("Pool error: {}", err))
    }
}

impl From<std::io::Error> for TenantError {
    fn from(err: std::io::Error) -> Self {
        TenantError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for TenantError {
    fn from(err: serde_json::Error) -> Self {
        TenantError::Internal(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for TenantError {
    fn from(err: anyhow::Error) -> Self {
        TenantError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TenantError>;
