use axum::{extract::FromRequestParts, http::request::Parts};
use rw_core::types::TenantId;
use uuid::Uuid;

use crate::api_error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Caller's tenant, read from the `x-tenant-id` header.
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or_else(|| ApiError::BadRequest(format!("missing {TENANT_HEADER} header")))?;
        let id = raw
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or_else(|| ApiError::BadRequest(format!("{TENANT_HEADER} must be a UUID")))?;
        Ok(Tenant(id))
    }
}
