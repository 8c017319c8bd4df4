//! Gateway HTTP client
//!
//! Typed calls against the external WhatsApp gateway. Every call carries a
//! request id and is logged with its latency. Timeouts are hard: 15 s for
//! text, 120 s for media; a timed-out call surfaces as a transient error
//! and is reconciled later through webhook idempotency.

use chrono::{DateTime, Utc};
use flowchat_common::config::GatewayConfig;
use flowchat_common::types::{ConnectionState, PhoneNumber};
use flowchat_storage::models::GatewayInstance;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Gateway call failures, classified for the caller's retry policy
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Instance unavailable: {0}")]
    InstanceUnavailable(String),

    #[error("Rate limited by gateway")]
    RateLimited,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Media too large: {0} bytes")]
    MediaTooLarge(u64),

    #[error("Transient gateway error: {0}")]
    Transient(String),

    #[error("Permanent gateway error: {0}")]
    Permanent(String),
}

impl GatewayError {
    /// Whether the caller may retry with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::RateLimited)
    }
}

/// Acknowledgement for an accepted send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Gateway-assigned message id; the idempotency key for later receipts
    pub gateway_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// A media reference to send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    key: Option<SendResponseKey>,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponseKey {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InstanceStatusResponse {
    instance: InstanceStatusBody,
}

#[derive(Debug, Deserialize)]
struct InstanceStatusBody {
    #[serde(alias = "state", alias = "connectionStatus")]
    state: String,
}

/// Gateway HTTP client
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    fallback_api_key: Option<String>,
    text_timeout: Duration,
    media_timeout: Duration,
}

impl GatewayClient {
    /// Create a new gateway client from configuration
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            fallback_api_key: config.api_key.clone(),
            text_timeout: Duration::from_secs(config.text_timeout_secs),
            media_timeout: Duration::from_secs(config.media_timeout_secs),
        }
    }

    /// The API key for an instance: per-instance key wins, the global key
    /// is the fallback.
    fn api_key_for(&self, instance: &GatewayInstance) -> String {
        instance
            .api_key
            .clone()
            .or_else(|| self.fallback_api_key.clone())
            .unwrap_or_default()
    }

    /// Send a text message
    pub async fn send_text(
        &self,
        instance: &GatewayInstance,
        to: &PhoneNumber,
        body: &str,
        reply_to: Option<&str>,
    ) -> Result<SendReceipt, GatewayError> {
        let mut payload = json!({
            "number": to.digits(),
            "text": body,
        });
        if let Some(quoted) = reply_to {
            payload["quoted"] = json!({ "key": { "id": quoted } });
        }

        let url = format!("{}/message/sendText/{}", self.base_url, instance.external_id);
        self.post_send(instance, &url, payload, self.text_timeout)
            .await
    }

    /// Send a media message
    pub async fn send_media(
        &self,
        instance: &GatewayInstance,
        to: &PhoneNumber,
        media: &MediaRef,
        caption: Option<&str>,
    ) -> Result<SendReceipt, GatewayError> {
        let payload = json!({
            "number": to.digits(),
            "mediaMessage": {
                "media": media.url,
                "mimetype": media.mime_type,
                "fileName": media.file_name,
                "caption": caption,
            },
        });

        let url = format!(
            "{}/message/sendMedia/{}",
            self.base_url, instance.external_id
        );
        self.post_send(instance, &url, payload, self.media_timeout)
            .await
    }

    async fn post_send(
        &self,
        instance: &GatewayInstance,
        url: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<SendReceipt, GatewayError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let result = self
            .http
            .post(url)
            .header("apikey", self.api_key_for(instance))
            .header("x-request-id", request_id.to_string())
            .timeout(timeout)
            .json(&payload)
            .send()
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    %request_id,
                    instance = %instance.external_id,
                    latency_ms,
                    error = %e,
                    "Gateway send transport error"
                );
                return Err(classify_transport_error(e));
            }
        };

        let status = response.status();
        debug!(
            %request_id,
            instance = %instance.external_id,
            status = status.as_u16(),
            latency_ms,
            "Gateway send"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("Malformed gateway response: {}", e)))?;

        let gateway_id = parsed
            .key
            .map(|k| k.id)
            .or(parsed.message_id)
            .ok_or_else(|| {
                GatewayError::Transient("Gateway response missing message id".to_string())
            })?;

        Ok(SendReceipt {
            gateway_id,
            accepted_at: Utc::now(),
        })
    }

    /// Fetch the current connection state for an instance
    pub async fn fetch_instance_status(
        &self,
        instance: &GatewayInstance,
    ) -> Result<ConnectionState, GatewayError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let url = format!(
            "{}/instance/connectionState/{}",
            self.base_url, instance.external_id
        );

        let response = self
            .http
            .get(&url)
            .header("apikey", self.api_key_for(instance))
            .header("x-request-id", request_id.to_string())
            .timeout(self.text_timeout)
            .send()
            .await
            .map_err(classify_transport_error)?;

        debug!(
            %request_id,
            instance = %instance.external_id,
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Gateway instance status"
        );

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(code, &body));
        }

        let parsed: InstanceStatusResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("Malformed gateway response: {}", e)))?;

        parsed
            .instance
            .state
            .parse()
            .map_err(|_| GatewayError::Transient("Unknown connection state".to_string()))
    }

    /// Fetch the profile picture URL for a phone, when the contact has one
    pub async fn fetch_profile_picture(
        &self,
        instance: &GatewayInstance,
        phone: &PhoneNumber,
    ) -> Result<Option<String>, GatewayError> {
        let request_id = Uuid::new_v4();
        let url = format!(
            "{}/chat/fetchProfilePictureUrl/{}",
            self.base_url, instance.external_id
        );

        let response = self
            .http
            .post(&url)
            .header("apikey", self.api_key_for(instance))
            .header("x-request-id", request_id.to_string())
            .timeout(self.text_timeout)
            .json(&json!({ "number": phone.digits() }))
            .send()
            .await
            .map_err(classify_transport_error)?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(code, &body));
        }

        #[derive(Deserialize)]
        struct PictureResponse {
            #[serde(alias = "profilePictureUrl")]
            url: Option<String>,
        }

        let parsed: PictureResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("Malformed gateway response: {}", e)))?;
        Ok(parsed.url)
    }

    /// List instances known to the gateway
    pub async fn fetch_instances(&self) -> Result<Vec<String>, GatewayError> {
        let request_id = Uuid::new_v4();
        let url = format!("{}/instance/fetchInstances", self.base_url);

        let response = self
            .http
            .get(&url)
            .header("apikey", self.fallback_api_key.clone().unwrap_or_default())
            .header("x-request-id", request_id.to_string())
            .timeout(self.text_timeout)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(code, &body));
        }

        #[derive(Deserialize)]
        struct InstanceEntry {
            instance: InstanceEntryBody,
        }
        #[derive(Deserialize)]
        struct InstanceEntryBody {
            #[serde(alias = "instanceName")]
            name: String,
        }

        let parsed: Vec<InstanceEntry> = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("Malformed gateway response: {}", e)))?;
        Ok(parsed.into_iter().map(|e| e.instance.name).collect())
    }
}

fn classify_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Transient(format!("Gateway timeout: {}", e))
    } else {
        GatewayError::Transient(format!("Gateway transport error: {}", e))
    }
}

fn classify_status(status: u16, body: &str) -> GatewayError {
    match status {
        400 => GatewayError::InvalidRecipient(truncate(body, 200)),
        401 | 403 => GatewayError::Permanent(format!("Gateway rejected credentials: {}", status)),
        404 => GatewayError::InstanceUnavailable(truncate(body, 200)),
        408 | 429 => GatewayError::RateLimited,
        413 => GatewayError::MediaTooLarge(0),
        500..=599 => GatewayError::Transient(format!("Gateway error {}", status)),
        _ => GatewayError::Permanent(format!("Gateway error {}: {}", status, truncate(body, 200))),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_instance(external_id: &str) -> GatewayInstance {
        GatewayInstance {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "line-1".into(),
            external_id: external_id.into(),
            api_key: Some("secret".into()),
            connection_state: "open".into(),
            daily_limit: 1000,
            msgs_sent_today: 0,
            msgs_delivered_today: 0,
            msgs_read_today: 0,
            msgs_failed_today: 0,
            consecutive_errors: 0,
            last_success_at: None,
            health_score: 100,
            health_last_reset: Utc::now().date_naive(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_client(base: &str) -> GatewayClient {
        let mut config = GatewayConfig::default();
        config.base_url = base.to_string();
        GatewayClient::new(&config)
    }

    #[tokio::test]
    async fn test_send_text_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme"))
            .and(header_exists("apikey"))
            .and(header_exists("x-request-id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "key": { "id": "GW-1" }
                })),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let instance = test_instance("acme");
        let to = PhoneNumber::parse("5511999990000").unwrap();

        let receipt = client.send_text(&instance, &to, "oi", None).await.unwrap();
        assert_eq!(receipt.gateway_id, "GW-1");
    }

    #[tokio::test]
    async fn test_send_text_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let instance = test_instance("acme");
        let to = PhoneNumber::parse("5511999990000").unwrap();

        let err = client
            .send_text(&instance, &to, "oi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_send_text_invalid_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad number"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let instance = test_instance("acme");
        let to = PhoneNumber::parse("5511999990000").unwrap();

        let err = client
            .send_text(&instance, &to, "oi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRecipient(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let instance = test_instance("acme");
        let to = PhoneNumber::parse("5511999990000").unwrap();

        let err = client
            .send_text(&instance, &to, "oi", None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_instance_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/connectionState/acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "instance": { "state": "open" }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let instance = test_instance("acme");

        let state = client.fetch_instance_status(&instance).await.unwrap();
        assert_eq!(state, ConnectionState::Open);
    }
}
