use crate::api::ApiState;
use crate::error::{Result, TenantError};
use crate::pool::Connector;
use crate::tenant::{TenantId, TenantInfo};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

/// Works out which tenant an inbound request belongs to
pub trait TenantResolver: Send + Sync {
    fn resolve(&self, parts: &Parts) -> Result<TenantId>;
}

/// Reads the tenant id from a request header
#[derive(Debug, Clone)]
pub struct HeaderTenantResolver {
    header: String,
}

impl HeaderTenantResolver {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl TenantResolver for HeaderTenantResolver {
    fn resolve(&self, parts: &Parts) -> Result<TenantId> {
        let value = parts
            .headers
            .get(self.header.as_str())
            .ok_or_else(|| TenantError::ResolutionFailed {
                message: format!("Missing {} header", self.header),
            })?;

        let value = value
            .to_str()
            .map(str::trim)
            .map_err(|_| TenantError::ResolutionFailed {
                message: format!("Header {} is not valid text", self.header),
            })?;

        if value.is_empty() {
            return Err(TenantError::ResolutionFailed {
                message: format!("Header {} is empty", self.header),
            });
        }

        Ok(TenantId::from(value))
    }
}

/// Resolved tenant of the current request together with its live connection
pub struct TenantContext<D> {
    pub tenant_id: TenantId,
    pub info: TenantInfo,
    pub connection: D,
}

#[async_trait]
impl<C: Connector> FromRequestParts<ApiState<C>> for TenantContext<C::Connection> {
    type Rejection = TenantError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState<C>) -> Result<Self> {
        let tenant_id = state.resolver.resolve(parts)?;
        let registry = state.pool.registry();

        let connection = registry.get_or_err(&tenant_id)?;
        let info = registry
            .tenant_info(&tenant_id)
            .ok_or_else(|| TenantError::not_found(&tenant_id))?;

        debug!("Request resolved to tenant {}", tenant_id);

        Ok(TenantContext {
            tenant_id,
            info,
            connection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/tenant/info");
        if let Some(value) = header {
            builder = builder.header("X-Tenant-Id", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_header_resolver() {
        let resolver = HeaderTenantResolver::new("X-Tenant-Id");
        assert_eq!(resolver.resolve(&parts(Some(" 42 "))).unwrap().as_str(), "42");
    }

    #[test]
    fn test_header_resolver_missing_or_empty() {
        let resolver = HeaderTenantResolver::new("x-tenant-id");
        assert!(matches!(
            resolver.resolve(&parts(None)),
            Err(TenantError::ResolutionFailed { .. })
        ));
        assert!(matches!(
            resolver.resolve(&parts(Some(""))),
            Err(TenantError::ResolutionFailed { .. })
        ));
    }
}
