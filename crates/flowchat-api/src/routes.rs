//! API routes

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{
    campaigns, conversations, health, instances, metrics, realtime, tenants, webhooks,
};

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Conversation routes
    let conversation_routes = Router::new()
        .route("/", get(conversations::list_conversations))
        .route(
            "/:id/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route("/:id/read", post(conversations::mark_read))
        .route("/:id/open", post(conversations::open_conversation))
        .route("/:id/close", post(conversations::close_conversation))
        .route("/:id/transfer", post(conversations::transfer_conversation));

    // Campaign routes
    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats))
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/resume", post(campaigns::resume_campaign))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign))
        .route("/:campaign_id/reset", post(campaigns::reset_campaign));

    // Instance routes
    let instance_routes = Router::new()
        .route(
            "/",
            get(instances::list_instances).post(instances::create_instance),
        )
        .route("/:id", delete(instances::delete_instance))
        .route("/:id/refresh", post(instances::refresh_instance));

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .nest("/conversations", conversation_routes)
        .nest("/campaigns", campaign_routes)
        .nest("/instances", instance_routes)
        .route("/tenants/limits", get(tenants::get_limits))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Operator realtime channel (authenticated)
    let ws_routes = Router::new()
        .route("/ws", get(realtime::ws_upgrade))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Gateway webhook: authenticated by shared secret + allowlist inside
    let webhook_routes = Router::new()
        .route("/gateway", post(webhooks::gateway_webhook))
        .with_state(state.clone());

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .nest("/webhooks", webhook_routes)
        .merge(ws_routes)
        .route("/metrics", get(metrics::metrics).with_state(state))
        .layer(TraceLayer::new_for_http())
}
