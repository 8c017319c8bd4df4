//! Conversation and message handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use flowchat_common::types::{
    ConversationId, ConversationStatus, DepartmentId, MessageDirection, MessageState, PhoneNumber,
};
use flowchat_core::gateway::client::GatewayError;
use flowchat_core::realtime::RealtimeEvent;
use flowchat_core::registry::FailureKind;
use flowchat_storage::models::{Conversation, CreateMessage, Message};
use flowchat_storage::repository::conversations::ConversationFilter;
use flowchat_storage::repository::InstanceRepository;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::auth::{AppState, AuthContext};
use crate::handlers::{error_response, internal, not_found, ApiError};

/// Query parameters for listing conversations
#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub status: Option<String>,
    pub department_id: Option<DepartmentId>,
    /// Reconnect reconcile cursor: only rows updated after this instant
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// List conversations for the authenticated tenant
///
/// GET /api/v1/conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<flowchat_common::types::Paginated<Conversation>>, ApiError> {
    let filter = ConversationFilter {
        status: query.status.and_then(|s| s.parse::<ConversationStatus>().ok()),
        department_id: query.department_id,
        since: query.since,
    };

    let repo = state.service.conversations();
    let data = repo
        .list_by_tenant(auth.tenant_id, &filter, query.limit, query.offset)
        .await
        .map_err(|e| {
            error!("Failed to list conversations: {}", e);
            internal("Failed to list conversations")
        })?;
    let total = repo
        .count_by_tenant(auth.tenant_id, &filter)
        .await
        .unwrap_or(0);

    Ok(Json(flowchat_common::types::Paginated {
        data,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Query parameters for listing messages
#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    /// Resume after this server sequence (reconnect reconcile)
    pub since: Option<i64>,
    #[serde(default = "default_message_limit")]
    pub limit: i64,
}

fn default_message_limit() -> i64 {
    100
}

/// List messages of a conversation in server order
///
/// GET /api/v1/conversations/:id/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    // tenant scoping happens in the query itself
    let messages = state
        .service
        .messages()
        .list_by_conversation(auth.tenant_id, conversation_id, query.since, query.limit)
        .await
        .map_err(|e| {
            error!("Failed to list messages: {}", e);
            internal("Failed to list messages")
        })?;

    Ok(Json(messages))
}

/// Request body for an operator send
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub reply_to_id: Option<Uuid>,
}

/// Operator outbound send: gateway call, persist, fan-out
///
/// POST /api/v1/conversations/:id/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<ConversationId>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let conversation = state
        .service
        .conversations()
        .get_by_tenant(auth.tenant_id, conversation_id)
        .await
        .map_err(|e| {
            error!("Conversation lookup failed: {}", e);
            internal("Conversation lookup failed")
        })?
        .ok_or_else(|| not_found("Conversation not found"))?;

    let instances = InstanceRepository::new(state.db_pool.pool().clone());
    let instance = instances
        .get_by_tenant(auth.tenant_id, conversation.instance_id)
        .await
        .map_err(|e| {
            error!("Instance lookup failed: {}", e);
            internal("Instance lookup failed")
        })?
        .ok_or_else(|| not_found("Instance not found"))?;

    let phone = PhoneNumber::parse(&conversation.contact_phone).ok_or_else(|| {
        error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_RECIPIENT",
            "Conversation contact has no sendable phone",
        )
    })?;

    // resolve the quoted message's gateway id, when replying
    let reply_external_id = match body.reply_to_id {
        Some(id) => state
            .service
            .messages()
            .get_by_tenant(auth.tenant_id, id)
            .await
            .map_err(|e| {
                error!("Reply lookup failed: {}", e);
                internal("Reply lookup failed")
            })?
            .and_then(|m| m.external_id),
        None => None,
    };

    let receipt = state
        .gateway
        .send_text(&instance, &phone, &body.content, reply_external_id.as_deref())
        .await
        .map_err(|e| {
            let failure = if e.is_transient() {
                FailureKind::Transient
            } else {
                FailureKind::Permanent
            };
            let registry = state.registry.clone();
            let instance_id = instance.id;
            tokio::spawn(async move {
                let _ = registry.record_failure(instance_id, failure).await;
            });

            match e {
                GatewayError::RateLimited => error_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    "Gateway rate limited",
                ),
                GatewayError::InvalidRecipient(_) => error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "INVALID_RECIPIENT",
                    "Gateway rejected the recipient",
                ),
                other => error_response(
                    StatusCode::BAD_GATEWAY,
                    "GATEWAY_ERROR",
                    &other.to_string(),
                ),
            }
        })?;

    let registry = state.registry.clone();
    let instance_id = instance.id;
    tokio::spawn(async move {
        let _ = registry.record_success(instance_id).await;
    });

    let message = state
        .service
        .messages()
        .append(CreateMessage {
            conversation_id,
            tenant_id: auth.tenant_id,
            direction: MessageDirection::Outgoing,
            content: Some(body.content),
            sender_name: None,
            sender_phone: None,
            reply_to_id: body.reply_to_id,
            state: MessageState::Sent,
            external_id: Some(receipt.gateway_id),
            gateway_timestamp: None,
        })
        .await
        .map_err(|e| {
            error!("Failed to persist sent message: {}", e);
            internal("Failed to persist message")
        })?;

    state
        .service
        .conversations()
        .touch_activity(conversation_id)
        .await
        .ok();

    state
        .hub
        .publish_to_conversation(
            conversation_id,
            RealtimeEvent::MessageNew(
                serde_json::to_value(&message).unwrap_or(serde_json::Value::Null),
            ),
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Request body for operator read markers
#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

/// Record operator read markers. This never advances the contact-facing
/// message state; only a gateway-reported read does that.
///
/// POST /api/v1/conversations/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(_conversation_id): Path<ConversationId>,
    Json(body): Json<MarkReadRequest>,
) -> Result<StatusCode, ApiError> {
    let Some(user_id) = auth.user_id else {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "API key has no operator user",
        ));
    };

    state
        .service
        .mark_read_by_operator(&body.message_ids, user_id)
        .await
        .map_err(|e| {
            error!("Failed to record read markers: {}", e);
            internal("Failed to record read markers")
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Operator pickup
///
/// POST /api/v1/conversations/:id/open
pub async fn open_conversation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<Conversation>, ApiError> {
    let updated = state
        .service
        .open(auth.tenant_id, conversation_id)
        .await
        .map_err(|e| {
            error!("Failed to open conversation: {}", e);
            internal("Failed to open conversation")
        })?
        .ok_or_else(|| {
            error_response(
                StatusCode::CONFLICT,
                "invalid_transition",
                "Conversation is not pending",
            )
        })?;

    publish_conversation_update(&state, &updated).await;
    Ok(Json(updated))
}

/// Manual close
///
/// POST /api/v1/conversations/:id/close
pub async fn close_conversation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<Conversation>, ApiError> {
    let updated = state
        .service
        .close(auth.tenant_id, conversation_id)
        .await
        .map_err(|e| {
            error!("Failed to close conversation: {}", e);
            internal("Failed to close conversation")
        })?
        .ok_or_else(|| {
            error_response(
                StatusCode::CONFLICT,
                "invalid_transition",
                "Conversation is not open",
            )
        })?;

    publish_conversation_update(&state, &updated).await;
    Ok(Json(updated))
}

/// Request body for a department transfer
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub department_id: DepartmentId,
}

/// Manual transfer to another department
///
/// POST /api/v1/conversations/:id/transfer
pub async fn transfer_conversation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<ConversationId>,
    Json(body): Json<TransferRequest>,
) -> Result<StatusCode, ApiError> {
    let transferred = state
        .router
        .transfer(auth.tenant_id, conversation_id, body.department_id)
        .await
        .map_err(|e| {
            error!("Transfer failed: {}", e);
            internal("Transfer failed")
        })?;

    if !transferred {
        return Err(not_found("Conversation or department not found"));
    }

    if let Ok(Some(updated)) = state
        .service
        .conversations()
        .get_by_tenant(auth.tenant_id, conversation_id)
        .await
    {
        publish_conversation_update(&state, &updated).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn publish_conversation_update(state: &AppState, conversation: &Conversation) {
    state
        .hub
        .publish_to_tenant(
            conversation.tenant_id,
            RealtimeEvent::ConversationUpdated(
                serde_json::to_value(conversation).unwrap_or(serde_json::Value::Null),
            ),
        )
        .await;
}
