//! API handlers

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

pub mod campaigns;
pub mod conversations;
pub mod health;
pub mod instances;
pub mod metrics;
pub mod realtime;
pub mod tenants;
pub mod webhooks;

/// Error response body: a stable code plus a tenant-safe message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Handler error alias
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build an error response
pub fn error_response(status: StatusCode, code: &str, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: message.to_string(),
            details: None,
        }),
    )
}

/// Map a domain error onto its HTTP response. Entitlement denials carry
/// the current/limit pair so clients can render the quota.
pub fn from_domain(err: &flowchat_common::Error) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let details = match err {
        flowchat_common::Error::EntitlementDenied { current, limit, .. } => {
            Some(serde_json::json!({ "current": current, "limit": limit }))
        }
        _ => None,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.code().to_string(),
            message: err.to_string(),
            details,
        }),
    )
}

/// Opaque 500 for storage failures; details go to the log, not the client
pub fn internal(message: &str) -> ApiError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}

/// 403 for cross-tenant access
pub fn forbidden() -> ApiError {
    error_response(
        StatusCode::FORBIDDEN,
        "forbidden",
        "Not authorized for this tenant",
    )
}

/// 404 with a stable code
pub fn not_found(what: &str) -> ApiError {
    error_response(StatusCode::NOT_FOUND, "not_found", what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_entitlement_denied_body_carries_quota() {
        let err = flowchat_common::Error::EntitlementDenied {
            metric: "instances".to_string(),
            current: 2,
            limit: 2,
        };
        let (status, body) = from_domain(&err);

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.0.error, "ENTITLEMENT_DENIED");
        assert_eq!(
            body.0.details,
            Some(serde_json::json!({ "current": 2, "limit": 2 }))
        );
    }
}
