//! Flow Chat API - REST and realtime surface
//!
//! This crate provides the axum router for the dispatcher: conversation
//! and campaign endpoints, the tenant limits endpoint, the gateway
//! webhook, the operator WebSocket and the metrics endpoint.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{AppState, AuthContext};
pub use routes::create_router;
