//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use flowchat_common::types::{CampaignId, CampaignStatus, ContactId, InstanceId};
use flowchat_core::campaigns::CampaignError;
use flowchat_storage::models::{Campaign, CreateCampaign, CreateCampaignMessage};
use flowchat_storage::repository::{CampaignContactRepository, CampaignRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::auth::{AppState, AuthContext};
use crate::handlers::{error_response, internal, not_found, ApiError};

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: CampaignId,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub pause_reason: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub min_delay_secs: i32,
    pub max_delay_secs: i32,
    pub respect_business_hours: bool,
    pub total_contacts: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub failed_count: i32,
    pub progress_percentage: f64,
    pub last_instance_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress = c.progress_percentage();
        Self {
            id: c.id,
            name: c.name,
            description: c.description,
            status: c.status,
            pause_reason: c.pause_reason,
            starts_at: c.starts_at,
            min_delay_secs: c.min_delay_secs,
            max_delay_secs: c.max_delay_secs,
            respect_business_hours: c.respect_business_hours,
            total_contacts: c.total_contacts,
            sent_count: c.sent_count,
            delivered_count: c.delivered_count,
            failed_count: c.failed_count,
            progress_percentage: progress,
            last_instance_name: c.last_instance_name,
            created_at: c.created_at,
            started_at: c.started_at,
            completed_at: c.completed_at,
        }
    }
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub min_delay_secs: Option<i32>,
    pub max_delay_secs: Option<i32>,
    pub batch_size: Option<i32>,
    pub respect_business_hours: Option<bool>,
    pub instance_ids: Vec<InstanceId>,
    pub messages: Vec<CampaignMessageBody>,
    pub contact_ids: Vec<ContactId>,
}

/// One ordered message template
#[derive(Debug, Deserialize)]
pub struct CampaignMessageBody {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub content: String,
    pub media_url: Option<String>,
    pub caption: Option<String>,
}

fn default_kind() -> String {
    "text".to_string()
}

/// List campaigns for the authenticated tenant
///
/// GET /api/v1/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<Vec<CampaignResponse>>, ApiError> {
    let repo = CampaignRepository::new(state.db_pool.pool().clone());
    let status = query.status.and_then(|s| s.parse::<CampaignStatus>().ok());

    let campaigns = repo
        .list_by_tenant(auth.tenant_id, status, query.limit, query.offset)
        .await
        .map_err(|e| {
            error!("Failed to list campaigns: {}", e);
            internal("Failed to list campaigns")
        })?;

    Ok(Json(campaigns.into_iter().map(CampaignResponse::from).collect()))
}

/// Create a campaign with its messages and audience
///
/// POST /api/v1/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    if body.messages.is_empty() {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "A campaign needs at least one message",
        ));
    }
    if body.instance_ids.is_empty() {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "A campaign needs at least one assigned instance",
        ));
    }

    let repo = CampaignRepository::new(state.db_pool.pool().clone());
    let contact_repo = CampaignContactRepository::new(state.db_pool.pool().clone());

    let campaign = repo
        .create(CreateCampaign {
            tenant_id: auth.tenant_id,
            name: body.name,
            description: body.description,
            starts_at: body.starts_at,
            min_delay_secs: body.min_delay_secs,
            max_delay_secs: body.max_delay_secs,
            batch_size: body.batch_size,
            respect_business_hours: body.respect_business_hours,
            instance_ids: body.instance_ids,
        })
        .await
        .map_err(|e| {
            error!("Failed to create campaign: {}", e);
            internal("Failed to create campaign")
        })?;

    for (position, message) in body.messages.into_iter().enumerate() {
        repo.add_message(CreateCampaignMessage {
            campaign_id: campaign.id,
            tenant_id: auth.tenant_id,
            position: position as i32,
            kind: message.kind,
            content: message.content,
            media_url: message.media_url,
            caption: message.caption,
        })
        .await
        .map_err(|e| {
            error!("Failed to add campaign message: {}", e);
            internal("Failed to add campaign message")
        })?;
    }

    if !body.contact_ids.is_empty() {
        contact_repo
            .add_contacts(campaign.id, auth.tenant_id, &body.contact_ids)
            .await
            .map_err(|e| {
                error!("Failed to attach campaign contacts: {}", e);
                internal("Failed to attach campaign contacts")
            })?;
    }

    Ok((StatusCode::CREATED, Json(campaign.into())))
}

/// Get one campaign
///
/// GET /api/v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let repo = CampaignRepository::new(state.db_pool.pool().clone());
    let campaign = repo
        .get_by_tenant(auth.tenant_id, campaign_id)
        .await
        .map_err(|e| {
            error!("Failed to get campaign: {}", e);
            internal("Failed to get campaign")
        })?
        .ok_or_else(|| not_found("Campaign not found"))?;

    Ok(Json(campaign.into()))
}

/// Per-status contact counts
#[derive(Debug, Serialize)]
pub struct CampaignStatsResponse {
    pub campaign_id: CampaignId,
    pub status: String,
    pub pending: i64,
    pub queued: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub skipped: i64,
    pub progress_percentage: f64,
}

/// Campaign statistics
///
/// GET /api/v1/campaigns/:id/stats
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<CampaignStatsResponse>, ApiError> {
    let repo = CampaignRepository::new(state.db_pool.pool().clone());
    let contact_repo = CampaignContactRepository::new(state.db_pool.pool().clone());

    let campaign = repo
        .get_by_tenant(auth.tenant_id, campaign_id)
        .await
        .map_err(|e| {
            error!("Failed to get campaign: {}", e);
            internal("Failed to get campaign")
        })?
        .ok_or_else(|| not_found("Campaign not found"))?;

    let counts = contact_repo.status_counts(campaign_id).await.map_err(|e| {
        error!("Failed to get campaign counts: {}", e);
        internal("Failed to get campaign counts")
    })?;

    Ok(Json(CampaignStatsResponse {
        campaign_id,
        status: campaign.status.clone(),
        pending: counts.pending,
        queued: counts.queued,
        sent: counts.sent,
        delivered: counts.delivered,
        failed: counts.failed,
        skipped: counts.skipped,
        progress_percentage: campaign.progress_percentage(),
    }))
}

/// Start a campaign (draft or scheduled)
///
/// POST /api/v1/campaigns/:id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .start(auth.tenant_id, campaign_id)
        .await
        .map(|c| Json(c.into()))
        .map_err(map_campaign_error)
}

/// Pause a running campaign
///
/// POST /api/v1/campaigns/:id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .pause(auth.tenant_id, campaign_id, "operator_request")
        .await
        .map(|c| Json(c.into()))
        .map_err(map_campaign_error)
}

/// Resume a paused campaign
///
/// POST /api/v1/campaigns/:id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .resume(auth.tenant_id, campaign_id)
        .await
        .map(|c| Json(c.into()))
        .map_err(map_campaign_error)
}

/// Reset a failed campaign back to draft
///
/// POST /api/v1/campaigns/:id/reset
pub async fn reset_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .reset(auth.tenant_id, campaign_id)
        .await
        .map(|c| Json(c.into()))
        .map_err(map_campaign_error)
}

/// Cancel a campaign (terminal)
///
/// POST /api/v1/campaigns/:id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .cancel(auth.tenant_id, campaign_id)
        .await
        .map(|c| Json(c.into()))
        .map_err(map_campaign_error)
}

fn map_campaign_error(err: CampaignError) -> ApiError {
    match &err {
        CampaignError::NotFound => not_found("Campaign not found"),
        CampaignError::InvalidTransition { from } => error_response(
            StatusCode::CONFLICT,
            "invalid_transition",
            &format!("Campaign cannot leave status '{}'", from),
        ),
        CampaignError::NoContacts => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "Campaign has no contacts",
        ),
        CampaignError::NoMessages => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "Campaign has no messages",
        ),
        CampaignError::EntitlementDenied {
            metric,
            current,
            limit,
        } => {
            let mut response = error_response(
                StatusCode::FORBIDDEN,
                "ENTITLEMENT_DENIED",
                &format!("{}: {}/{}", metric, current, limit),
            );
            response.1 .0.details =
                Some(serde_json::json!({ "current": current, "limit": limit }));
            response
        }
        CampaignError::Database(e) => {
            error!("Campaign operation failed: {}", e);
            internal("Campaign operation failed")
        }
        CampaignError::Internal(e) => {
            error!("Campaign operation failed: {}", e);
            internal("Campaign operation failed")
        }
    }
}
