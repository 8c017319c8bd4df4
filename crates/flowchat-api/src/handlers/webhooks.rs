//! Gateway webhook endpoint
//!
//! Unauthenticated at the framework layer: callers prove themselves with
//! the shared-secret signature header and must come from an allowlisted
//! network. Malformed events are acknowledged after quarantine; only a
//! storage outage returns 5xx so the gateway redelivers.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use flowchat_core::gateway::GatewayEvent;
use flowchat_core::IngestOutcome;
use hmac::{Hmac, Mac};
use ipnet::IpNet;
use serde::Serialize;
use sha2::Sha256;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, warn};

use crate::auth::AppState;
use crate::handlers::{error_response, ApiError};

type HmacSha256 = Hmac<Sha256>;

/// Webhook acknowledgement body
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: String,
}

/// Verify the HMAC-SHA256 signature of the raw body
pub(crate) fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);

    let Ok(expected) = hex::decode(signature_hex.trim_start_matches("sha256=")) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

/// Whether the caller IP is inside the allowlist. An empty allowlist
/// allows everyone.
pub(crate) fn ip_allowed(allowed_networks: &[String], ip: IpAddr) -> bool {
    if allowed_networks.is_empty() {
        return true;
    }
    allowed_networks.iter().any(|net| {
        net.parse::<IpNet>()
            .map(|n| n.contains(&ip))
            .or_else(|_| net.parse::<IpAddr>().map(|a| a == ip))
            .unwrap_or(false)
    })
}

fn caller_ip(headers: &HeaderMap, addr: &SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| addr.ip())
}

/// POST /webhooks/gateway
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let ip = caller_ip(&headers, &addr);
    if !ip_allowed(&state.webhook.allowed_networks, ip) {
        warn!(%ip, "Webhook from disallowed network");
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "forbidden",
            "Caller network not allowed",
        ));
    }

    if let Some(secret) = &state.webhook.secret {
        let signed = headers
            .get("x-gateway-signature")
            .and_then(|v| v.to_str().ok())
            .map(|sig| verify_signature(secret, &body, sig))
            .unwrap_or(false);
        let plain = headers
            .get("x-gateway-secret")
            .and_then(|v| v.to_str().ok())
            .map(|s| s == secret)
            .unwrap_or(false);

        if !signed && !plain {
            warn!(%ip, "Webhook failed authentication");
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid webhook credentials",
            ));
        }
    }

    let event: GatewayEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            // schema garbage is acknowledged, never redelivered
            warn!(error = %e, "Undecodable webhook body");
            return Ok(Json(WebhookAck {
                status: "quarantined".to_string(),
            }));
        }
    };

    match state.ingestor.handle(&event).await {
        Ok(outcome) => {
            let status = match outcome {
                IngestOutcome::Processed => "processed",
                IngestOutcome::Deduplicated => "duplicate",
                IngestOutcome::Quarantined => "quarantined",
                IngestOutcome::Refused => "refused",
            };
            Ok(Json(WebhookAck {
                status: status.to_string(),
            }))
        }
        Err(e) => {
            // storage outage: 5xx so the gateway redelivers
            error!(error = %e, "Webhook ingest failed on storage");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Ingest temporarily unavailable",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let secret = "s3cret";
        let body = br#"{"event":"messages.upsert"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &signature));
        assert!(verify_signature(secret, body, &format!("sha256={}", signature)));
        assert!(!verify_signature(secret, body, "deadbeef"));
        assert!(!verify_signature("other", body, &signature));
    }

    #[test]
    fn test_ip_allowlist() {
        let nets = vec!["10.0.0.0/8".to_string(), "192.168.1.77".to_string()];

        assert!(ip_allowed(&nets, "10.1.2.3".parse().unwrap()));
        assert!(ip_allowed(&nets, "192.168.1.77".parse().unwrap()));
        assert!(!ip_allowed(&nets, "8.8.8.8".parse().unwrap()));

        // empty allowlist admits everyone
        assert!(ip_allowed(&[], "8.8.8.8".parse().unwrap()));
    }
}
