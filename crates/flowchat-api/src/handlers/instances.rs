//! Gateway instance handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use flowchat_common::types::InstanceId;
use flowchat_core::entitlements::METRIC_INSTANCES;
use flowchat_storage::models::{CreateInstance, GatewayInstance};
use flowchat_storage::repository::InstanceRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::auth::{AppState, AuthContext};
use crate::handlers::{error_response, from_domain, internal, not_found, ApiError};

/// Instance response with health details
#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    pub id: InstanceId,
    pub name: String,
    pub external_id: String,
    pub connection_state: String,
    pub daily_limit: i32,
    pub msgs_sent_today: i32,
    pub msgs_delivered_today: i32,
    pub msgs_read_today: i32,
    pub msgs_failed_today: i32,
    pub consecutive_errors: i32,
    pub health_score: i32,
    pub eligible: bool,
}

impl From<GatewayInstance> for InstanceResponse {
    fn from(i: GatewayInstance) -> Self {
        let eligible = i.is_eligible();
        Self {
            id: i.id,
            name: i.name,
            external_id: i.external_id,
            connection_state: i.connection_state,
            daily_limit: i.daily_limit,
            msgs_sent_today: i.msgs_sent_today,
            msgs_delivered_today: i.msgs_delivered_today,
            msgs_read_today: i.msgs_read_today,
            msgs_failed_today: i.msgs_failed_today,
            consecutive_errors: i.consecutive_errors,
            health_score: i.health_score,
            eligible,
        }
    }
}

/// Request body for registering an instance
#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub external_id: String,
    pub api_key: Option<String>,
    pub daily_limit: Option<i32>,
}

/// List instances for the authenticated tenant
///
/// GET /api/v1/instances
pub async fn list_instances(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<InstanceResponse>>, ApiError> {
    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instances = repo.list_by_tenant(auth.tenant_id).await.map_err(|e| {
        error!("Failed to list instances: {}", e);
        internal("Failed to list instances")
    })?;

    Ok(Json(instances.into_iter().map(InstanceResponse::from).collect()))
}

/// Register a new gateway instance, passing the entitlement gate first
///
/// POST /api/v1/instances
pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<InstanceResponse>), ApiError> {
    // plan gate: instances metric
    state
        .gate
        .require(auth.tenant_id, METRIC_INSTANCES)
        .await
        .map_err(|e| from_domain(&e))?;

    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instance = repo
        .create(CreateInstance {
            tenant_id: auth.tenant_id,
            name: body.name,
            external_id: body.external_id,
            api_key: body.api_key,
            daily_limit: body.daily_limit,
        })
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => error_response(
                StatusCode::CONFLICT,
                "VALIDATION_ERROR",
                "Instance name or external id already in use",
            ),
            _ => {
                error!("Failed to create instance: {}", e);
                internal("Failed to create instance")
            }
        })?;

    state.gate.invalidate(auth.tenant_id).await;
    Ok((StatusCode::CREATED, Json(instance.into())))
}

/// Remove a gateway instance and free its entitlement slot
///
/// DELETE /api/v1/instances/:id
pub async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(instance_id): Path<InstanceId>,
) -> Result<StatusCode, ApiError> {
    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let deleted = repo
        .delete(auth.tenant_id, instance_id)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => error_response(
                StatusCode::CONFLICT,
                "VALIDATION_ERROR",
                "Instance still has conversations or campaigns",
            ),
            _ => {
                error!("Failed to delete instance: {}", e);
                internal("Failed to delete instance")
            }
        })?;

    if !deleted {
        return Err(not_found("Instance not found"));
    }

    state.gate.invalidate(auth.tenant_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Refresh one instance's connection state from the gateway
///
/// POST /api/v1/instances/:id/refresh
pub async fn refresh_instance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(instance_id): Path<InstanceId>,
) -> Result<Json<InstanceResponse>, ApiError> {
    let repo = InstanceRepository::new(state.db_pool.pool().clone());
    let instance = repo
        .get_by_tenant(auth.tenant_id, instance_id)
        .await
        .map_err(|e| {
            error!("Instance lookup failed: {}", e);
            internal("Instance lookup failed")
        })?
        .ok_or_else(|| not_found("Instance not found"))?;

    match state.gateway.fetch_instance_status(&instance).await {
        Ok(connection_state) => {
            state
                .registry
                .apply_connection_state(instance.id, connection_state)
                .await
                .map_err(|e| {
                    error!("Failed to record connection state: {}", e);
                    internal("Failed to record connection state")
                })?;
        }
        Err(e) => {
            return Err(error_response(
                StatusCode::BAD_GATEWAY,
                "GATEWAY_ERROR",
                &e.to_string(),
            ))
        }
    }

    let refreshed = repo
        .get_by_tenant(auth.tenant_id, instance_id)
        .await
        .map_err(|e| {
            error!("Instance lookup failed: {}", e);
            internal("Instance lookup failed")
        })?
        .ok_or_else(|| not_found("Instance not found"))?;

    Ok(Json(refreshed.into()))
}
