//! Database models

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use flowchat_common::types::{
    AttachmentId, AttachmentKind, CampaignContactId, CampaignContactStatus, CampaignId,
    CampaignStatus, ConnectionState, ContactId, ConversationId, ConversationStatus,
    ConversationType, DepartmentId, InstanceId, MessageDirection, MessageId, MessageState,
    ProductId, TenantId, TenantStatus, UserId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tenant model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub slug: String,
    pub status: String,
    pub plan: String,
    /// Minutes east of UTC; drives the tenant-local calendar day
    pub utc_offset_minutes: i32,
    /// Reply prepended to sends dispatched outside business hours
    pub after_hours_message: Option<String>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Get status enum
    pub fn status_enum(&self) -> Option<TenantStatus> {
        self.status.parse().ok()
    }

    /// Whether the tenant may send and receive
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// The tenant-local calendar date for a given instant
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        let offset = chrono::FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap());
        at.with_timezone(&offset).date_naive()
    }
}

/// Product model — a sellable capability with a numeric limit
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Metric this product limits, e.g. `instances`, `campaigns_per_month`
    pub metric: String,
    pub limit_value: i64,
    pub created_at: DateTime<Utc>,
}

/// Tenant-to-product grant, optionally overriding the product limit
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TenantProduct {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub limit_override: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Gateway instance model — one WhatsApp line
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GatewayInstance {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Instance identifier on the external gateway
    pub external_id: String,
    pub api_key: Option<String>,
    pub connection_state: String,
    pub daily_limit: i32,
    pub msgs_sent_today: i32,
    pub msgs_delivered_today: i32,
    pub msgs_read_today: i32,
    pub msgs_failed_today: i32,
    pub consecutive_errors: i32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub health_score: i32,
    pub health_last_reset: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GatewayInstance {
    /// Get connection state enum
    pub fn connection_state_enum(&self) -> Option<ConnectionState> {
        self.connection_state.parse().ok()
    }

    /// Eligibility for new sends: connected, not error-looping, under quota
    pub fn is_eligible(&self) -> bool {
        self.connection_state == "open"
            && self.consecutive_errors < 5
            && self.msgs_sent_today < self.daily_limit
    }
}

/// Department model — per-tenant routing bucket
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub tenant_id: TenantId,
    pub name: String,
    pub color: Option<String>,
    pub transfer_message: Option<String>,
    /// Ordered list of routing keywords
    pub routing_keywords: serde_json::Value,
    pub is_default: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Department {
    /// Get routing keywords as a vector
    pub fn keywords_vec(&self) -> Vec<String> {
        serde_json::from_value(self.routing_keywords.clone()).unwrap_or_default()
    }
}

/// Contact model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    /// Normalized E.164 phone
    pub phone: String,
    pub name: Option<String>,
    /// State inferred from the area code, when available
    pub state_code: Option<String>,
    pub tags: serde_json::Value,
    pub custom_vars: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversation model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub contact_phone: String,
    pub group_id: Option<String>,
    pub conversation_type: String,
    pub status: String,
    pub department_id: Option<DepartmentId>,
    pub group_metadata: serde_json::Value,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Get status enum
    pub fn status_enum(&self) -> Option<ConversationStatus> {
        self.status.parse().ok()
    }

    /// Get conversation type enum
    pub fn type_enum(&self) -> Option<ConversationType> {
        self.conversation_type.parse().ok()
    }
}

/// Message model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub tenant_id: TenantId,
    /// Server-assigned total order within the tenant; per-conversation
    /// ordering is this column filtered by conversation
    pub seq: i64,
    pub direction: String,
    pub content: Option<String>,
    /// Sender attribution inside group conversations
    pub sender_name: Option<String>,
    pub sender_phone: Option<String>,
    pub reply_to_id: Option<MessageId>,
    pub state: String,
    /// Gateway message id; dedup key together with the instance
    pub external_id: Option<String>,
    /// Gateway-reported timestamp, informational only
    pub gateway_timestamp: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Get direction enum
    pub fn direction_enum(&self) -> Option<MessageDirection> {
        self.direction.parse().ok()
    }

    /// Get state enum
    pub fn state_enum(&self) -> Option<MessageState> {
        self.state.parse().ok()
    }
}

/// Message attachment model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub id: AttachmentId,
    pub message_id: MessageId,
    pub tenant_id: TenantId,
    pub kind: String,
    /// Original URL reported by the gateway
    pub remote_url: String,
    /// Permanent object-store URL, set after upload
    pub storage_url: Option<String>,
    /// Local cache path, valid until `expires_at`
    pub local_path: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub duration_secs: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageAttachment {
    /// Get kind enum
    pub fn kind_enum(&self) -> Option<AttachmentKind> {
        self.kind.parse().ok()
    }
}

/// Reaction model — unique per (message, user, emoji)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Reaction {
    pub id: uuid::Uuid,
    pub message_id: MessageId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub contact_phone: Option<String>,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Per-operator read marker
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageRead {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub pause_reason: Option<String>,
    /// Immediate when null, otherwise the earliest start instant
    pub starts_at: Option<DateTime<Utc>>,
    pub min_delay_secs: i32,
    pub max_delay_secs: i32,
    pub batch_size: i32,
    pub respect_business_hours: bool,
    /// Ordered assigned instance ids, round-robin seeded by `instance_cursor`
    pub instance_ids: serde_json::Value,
    pub instance_cursor: i32,
    pub last_instance_name: Option<String>,
    pub total_contacts: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Get assigned instance ids as a vector
    pub fn instance_ids_vec(&self) -> Vec<InstanceId> {
        serde_json::from_value(self.instance_ids.clone()).unwrap_or_default()
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_contacts == 0 {
            0.0
        } else {
            (self.sent_count as f64 / self.total_contacts as f64) * 100.0
        }
    }
}

/// Campaign message template, ordered by `position`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignMessage {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub position: i32,
    pub kind: String,
    /// Template body with `{name}` / `{custom_vars.*}` placeholders
    pub content: String,
    pub media_url: Option<String>,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Campaign contact row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignContact {
    pub id: CampaignContactId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub tenant_id: TenantId,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub last_instance_name: Option<String>,
    /// Gateway id of the dispatched message, for delivery-receipt matching
    pub last_gateway_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignContact {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignContactStatus> {
        self.status.parse().ok()
    }
}

/// Append-only campaign audit log
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignLog {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub log_type: String,
    pub severity: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Business hours window for one weekday
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BusinessHours {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    /// 0 = Monday .. 6 = Sunday (chrono `num_days_from_monday`)
    pub weekday: i16,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    pub enabled: bool,
}

/// Holiday entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Holiday {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    pub day: NaiveDate,
    pub name: String,
}

/// Durable job queue model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: uuid::Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Inbound event fingerprint inside the dedup window
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventFingerprint {
    pub instance_id: InstanceId,
    pub external_id: String,
    pub event_kind: String,
    pub seen_at: DateTime<Utc>,
}

/// Quarantined malformed event
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuarantinedEvent {
    pub id: uuid::Uuid,
    pub instance_hint: Option<String>,
    pub reason: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// API key model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Whether the key has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|e| e < Utc::now()).unwrap_or(false)
    }

    /// Get scopes as a vector
    pub fn scopes_vec(&self) -> Vec<String> {
        serde_json::from_value(self.scopes.clone()).unwrap_or_default()
    }
}

// ============================================================================
// Create/update inputs
// ============================================================================

/// Create tenant input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub slug: String,
    pub plan: Option<String>,
    pub utc_offset_minutes: Option<i32>,
    pub settings: Option<serde_json::Value>,
}

/// Create gateway instance input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstance {
    pub tenant_id: TenantId,
    pub name: String,
    pub external_id: String,
    pub api_key: Option<String>,
    pub daily_limit: Option<i32>,
}

/// Create contact input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContact {
    pub tenant_id: TenantId,
    pub phone: String,
    pub name: Option<String>,
    pub state_code: Option<String>,
    pub tags: Option<serde_json::Value>,
    pub custom_vars: Option<serde_json::Value>,
}

/// Create conversation input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversation {
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub contact_phone: String,
    pub group_id: Option<String>,
    pub conversation_type: ConversationType,
    pub status: ConversationStatus,
    pub department_id: Option<DepartmentId>,
}

/// Create message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub conversation_id: ConversationId,
    pub tenant_id: TenantId,
    pub direction: MessageDirection,
    pub content: Option<String>,
    pub sender_name: Option<String>,
    pub sender_phone: Option<String>,
    pub reply_to_id: Option<MessageId>,
    pub state: MessageState,
    pub external_id: Option<String>,
    pub gateway_timestamp: Option<DateTime<Utc>>,
}

/// Create attachment input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAttachment {
    pub message_id: MessageId,
    pub tenant_id: TenantId,
    pub kind: AttachmentKind,
    pub remote_url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub duration_secs: Option<i32>,
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub min_delay_secs: Option<i32>,
    pub max_delay_secs: Option<i32>,
    pub batch_size: Option<i32>,
    pub respect_business_hours: Option<bool>,
    pub instance_ids: Vec<InstanceId>,
}

/// Create campaign message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignMessage {
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub position: i32,
    pub kind: String,
    pub content: String,
    pub media_url: Option<String>,
    pub caption: Option<String>,
}

/// Create campaign log input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignLog {
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub log_type: String,
    pub severity: String,
    pub message: String,
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tenant_local_date() {
        let tenant = Tenant {
            id: uuid::Uuid::new_v4(),
            name: "Acme".into(),
            slug: "acme".into(),
            status: "active".into(),
            plan: "pro".into(),
            utc_offset_minutes: -180, // UTC-3
            after_hours_message: None,
            settings: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // 01:30 UTC is still the previous day at UTC-3
        let at = "2024-06-10T01:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            tenant.local_date(at),
            NaiveDate::from_ymd_opt(2024, 6, 9).unwrap()
        );
    }

    #[test]
    fn test_instance_eligibility() {
        let mut inst = GatewayInstance {
            id: uuid::Uuid::new_v4(),
            tenant_id: uuid::Uuid::new_v4(),
            name: "line-1".into(),
            external_id: "acme".into(),
            api_key: None,
            connection_state: "open".into(),
            daily_limit: 1000,
            msgs_sent_today: 500,
            msgs_delivered_today: 0,
            msgs_read_today: 0,
            msgs_failed_today: 0,
            consecutive_errors: 0,
            last_success_at: None,
            health_score: 90,
            health_last_reset: Utc::now().date_naive(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(inst.is_eligible());

        inst.consecutive_errors = 5;
        assert!(!inst.is_eligible());

        inst.consecutive_errors = 0;
        inst.connection_state = "closed".into();
        assert!(!inst.is_eligible());

        inst.connection_state = "open".into();
        inst.msgs_sent_today = 1000;
        assert!(!inst.is_eligible());
    }
}
