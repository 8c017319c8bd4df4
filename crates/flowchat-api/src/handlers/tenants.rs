//! Tenant limits handler

use axum::{extract::State, Extension, Json};
use flowchat_common::types::Entitlement;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::auth::{AppState, AuthContext};
use crate::handlers::{internal, ApiError};

/// Resolved limits for the authenticated tenant
#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub limits: Vec<Entitlement>,
}

/// GET /api/v1/tenants/limits
pub async fn get_limits(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<LimitsResponse>, ApiError> {
    let limits = state.gate.resolve_all(auth.tenant_id).await.map_err(|e| {
        error!("Failed to resolve limits: {}", e);
        internal("Failed to resolve limits")
    })?;

    Ok(Json(LimitsResponse { limits }))
}
