//! Common types for the Flow Chat dispatcher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for tenants
pub type TenantId = Uuid;

/// Unique identifier for products
pub type ProductId = Uuid;

/// Unique identifier for gateway instances
pub type InstanceId = Uuid;

/// Unique identifier for departments
pub type DepartmentId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for conversations
pub type ConversationId = Uuid;

/// Unique identifier for messages
pub type MessageId = Uuid;

/// Unique identifier for message attachments
pub type AttachmentId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for campaign contacts
pub type CampaignContactId = Uuid;

/// Unique identifier for operator users
pub type UserId = Uuid;

/// Unique identifier for durable jobs
pub type JobId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// A normalized E.164 phone number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse and normalize a phone number into E.164 form.
    ///
    /// Accepts digits with optional `+`, spaces, dashes, dots and parens.
    /// Gateway JIDs (`5511999990000@s.whatsapp.net`) are accepted and the
    /// domain part is stripped.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.split('@').next().unwrap_or(raw);
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 8 || digits.len() > 15 {
            return None;
        }
        Some(Self(format!("+{}", digits)))
    }

    /// The E.164 string including the leading `+`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits only, without the leading `+` (gateway payload form)
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }

    /// Infer the Brazilian state (UF) from the area code, when the number
    /// is a Brazilian mobile/landline number. Returns `None` otherwise.
    pub fn infer_br_state(&self) -> Option<&'static str> {
        let digits = self.digits();
        let ddd: u8 = digits.strip_prefix("55")?.get(..2)?.parse().ok()?;
        let uf = match ddd {
            11..=19 => "SP",
            21 | 22 | 24 => "RJ",
            27 | 28 => "ES",
            31..=38 => "MG",
            41..=46 => "PR",
            47..=49 => "SC",
            51 | 53 | 54 | 55 => "RS",
            61 => "DF",
            62 | 64 => "GO",
            63 => "TO",
            65 | 66 => "MT",
            67 => "MS",
            68 => "AC",
            69 => "RO",
            71 | 73..=75 | 77 => "BA",
            79 => "SE",
            81 | 87 => "PE",
            82 => "AL",
            83 => "PB",
            84 => "RN",
            85 | 88 => "CE",
            86 | 89 => "PI",
            91 | 93 | 94 => "PA",
            92 | 97 => "AM",
            95 => "RR",
            96 => "AP",
            98 | 99 => "MA",
            _ => return None,
        };
        Some(uf)
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid phone number".to_string()))
    }
}

/// Tenant status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantStatus::Active => write!(f, "active"),
            TenantStatus::Suspended => write!(f, "suspended"),
            TenantStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "deleted" => Ok(TenantStatus::Deleted),
            _ => Err(format!("Invalid tenant status: {}", s)),
        }
    }
}

/// Gateway instance connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Open,
    Connecting,
    Closed,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ConnectionState::Open),
            "connecting" => Ok(ConnectionState::Connecting),
            "close" | "closed" => Ok(ConnectionState::Closed),
            "error" => Ok(ConnectionState::Error),
            _ => Err(format!("Invalid connection state: {}", s)),
        }
    }
}

/// Conversation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Pending,
    Open,
    Closed,
}

impl ConversationStatus {
    /// Valid edges: pending -> open, open -> closed, closed -> open.
    pub fn can_transition_to(self, next: ConversationStatus) -> bool {
        use ConversationStatus::*;
        matches!((self, next), (Pending, Open) | (Open, Closed) | (Closed, Open))
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationStatus::Pending => write!(f, "pending"),
            ConversationStatus::Open => write!(f, "open"),
            ConversationStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConversationStatus::Pending),
            "open" => Ok(ConversationStatus::Open),
            "closed" => Ok(ConversationStatus::Closed),
            _ => Err(format!("Invalid conversation status: {}", s)),
        }
    }
}

/// Conversation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Individual,
    Group,
}

impl std::fmt::Display for ConversationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationType::Individual => write!(f, "individual"),
            ConversationType::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for ConversationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(ConversationType::Individual),
            "group" => Ok(ConversationType::Group),
            _ => Err(format!("Invalid conversation type: {}", s)),
        }
    }
}

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl std::fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageDirection::Incoming => write!(f, "incoming"),
            MessageDirection::Outgoing => write!(f, "outgoing"),
        }
    }
}

impl std::str::FromStr for MessageDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(MessageDirection::Incoming),
            "outgoing" => Ok(MessageDirection::Outgoing),
            _ => Err(format!("Invalid message direction: {}", s)),
        }
    }
}

/// Message delivery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
    Deleted,
}

impl MessageState {
    /// Progress rank over `queued < sent < delivered < read`.
    /// `failed` and `deleted` are sinks and have no rank.
    fn rank(self) -> Option<u8> {
        match self {
            MessageState::Queued => Some(0),
            MessageState::Sent => Some(1),
            MessageState::Delivered => Some(2),
            MessageState::Read => Some(3),
            MessageState::Failed | MessageState::Deleted => None,
        }
    }

    /// Whether a state change to `next` is a forward move. Delivery state
    /// never regresses; the two sink states accept no further transitions.
    pub fn can_advance_to(self, next: MessageState) -> bool {
        match (self.rank(), next.rank()) {
            // sinks never advance
            (None, _) => false,
            // moving into a sink is always allowed from a live state
            (Some(_), None) => true,
            (Some(cur), Some(nxt)) => nxt > cur,
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageState::Queued => write!(f, "queued"),
            MessageState::Sent => write!(f, "sent"),
            MessageState::Delivered => write!(f, "delivered"),
            MessageState::Read => write!(f, "read"),
            MessageState::Failed => write!(f, "failed"),
            MessageState::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for MessageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(MessageState::Queued),
            "sent" => Ok(MessageState::Sent),
            "delivered" => Ok(MessageState::Delivered),
            "read" => Ok(MessageState::Read),
            "failed" => Ok(MessageState::Failed),
            "deleted" => Ok(MessageState::Deleted),
            _ => Err(format!("Invalid message state: {}", s)),
        }
    }
}

/// Attachment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    Document,
}

impl AttachmentKind {
    /// Classify from a mime type; anything unrecognized is a document.
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or("") {
            "image" => AttachmentKind::Image,
            "audio" => AttachmentKind::Audio,
            "video" => AttachmentKind::Video,
            _ => AttachmentKind::Document,
        }
    }
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentKind::Image => write!(f, "image"),
            AttachmentKind::Audio => write!(f, "audio"),
            AttachmentKind::Video => write!(f, "video"),
            AttachmentKind::Document => write!(f, "document"),
        }
    }
}

impl std::str::FromStr for AttachmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(AttachmentKind::Image),
            "audio" => Ok(AttachmentKind::Audio),
            "video" => Ok(AttachmentKind::Video),
            "document" => Ok(AttachmentKind::Document),
            _ => Err(format!("Invalid attachment kind: {}", s)),
        }
    }
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// Explicit state machine:
    /// `draft -> scheduled -> running <-> paused -> completed|cancelled|failed`.
    /// `failed` is terminal and requires an operator reset back to `draft`.
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Running)
                | (Scheduled, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Paused, Failed)
                | (Failed, Draft)
        )
    }

    /// Whether the campaign can never send again without operator action
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Scheduled => write!(f, "scheduled"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Per-row campaign contact status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignContactStatus {
    Pending,
    Queued,
    Sent,
    Delivered,
    Failed,
    Skipped,
}

impl CampaignContactStatus {
    /// Monotone DAG: `pending -> queued -> sent -> delivered`, with
    /// `failed`/`skipped` reachable from any non-terminal node. Nothing
    /// ever moves back to `pending`.
    pub fn can_transition_to(self, next: CampaignContactStatus) -> bool {
        use CampaignContactStatus::*;
        match self {
            Pending => matches!(next, Queued | Skipped | Failed),
            Queued => matches!(next, Sent | Failed | Skipped),
            Sent => matches!(next, Delivered | Failed),
            Delivered | Failed | Skipped => false,
        }
    }

    /// Terminal statuses never change again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignContactStatus::Delivered
                | CampaignContactStatus::Failed
                | CampaignContactStatus::Skipped
        )
    }
}

impl std::fmt::Display for CampaignContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignContactStatus::Pending => write!(f, "pending"),
            CampaignContactStatus::Queued => write!(f, "queued"),
            CampaignContactStatus::Sent => write!(f, "sent"),
            CampaignContactStatus::Delivered => write!(f, "delivered"),
            CampaignContactStatus::Failed => write!(f, "failed"),
            CampaignContactStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for CampaignContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CampaignContactStatus::Pending),
            "queued" => Ok(CampaignContactStatus::Queued),
            "sent" => Ok(CampaignContactStatus::Sent),
            "delivered" => Ok(CampaignContactStatus::Delivered),
            "failed" => Ok(CampaignContactStatus::Failed),
            "skipped" => Ok(CampaignContactStatus::Skipped),
            _ => Err(format!("Invalid campaign contact status: {}", s)),
        }
    }
}

/// Inbound event kinds observed from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageUpsert,
    MessageUpdate,
    MessageDelete,
    PresenceUpdate,
    ConnectionUpdate,
    ReactionAdd,
    GroupParticipantsUpdate,
}

impl EventKind {
    /// Parse the gateway's dotted event name
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "messages.upsert" | "message.upsert" => Some(EventKind::MessageUpsert),
            "messages.update" | "message.update" => Some(EventKind::MessageUpdate),
            "messages.delete" | "message.delete" => Some(EventKind::MessageDelete),
            "presence.update" => Some(EventKind::PresenceUpdate),
            "connection.update" => Some(EventKind::ConnectionUpdate),
            "messages.reaction" | "reaction.add" => Some(EventKind::ReactionAdd),
            "group-participants.update" | "group.participants.update" => {
                Some(EventKind::GroupParticipantsUpdate)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::MessageUpsert => "message.upsert",
            EventKind::MessageUpdate => "message.update",
            EventKind::MessageDelete => "message.delete",
            EventKind::PresenceUpdate => "presence.update",
            EventKind::ConnectionUpdate => "connection.update",
            EventKind::ReactionAdd => "reaction.add",
            EventKind::GroupParticipantsUpdate => "group.participants.update",
        };
        write!(f, "{}", s)
    }
}

/// Dedup fingerprint for inbound events: duplicates inside the dedup
/// window collapse onto the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub instance_id: InstanceId,
    pub external_id: String,
    pub kind: EventKind,
}

/// Resolved entitlement for a (tenant, metric) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub metric: String,
    pub current: i64,
    pub limit: i64,
    pub allowed: bool,
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_phone_parse_and_normalize() {
        let phone = PhoneNumber::parse("+55 (11) 99999-0000").unwrap();
        assert_eq!(phone.as_str(), "+5511999990000");
        assert_eq!(phone.digits(), "5511999990000");
    }

    #[test]
    fn test_phone_parse_jid() {
        let phone = PhoneNumber::parse("5511999990000@s.whatsapp.net").unwrap();
        assert_eq!(phone.as_str(), "+5511999990000");
    }

    #[test]
    fn test_phone_parse_invalid() {
        assert!(PhoneNumber::parse("12345").is_none());
        assert!(PhoneNumber::parse("not a number").is_none());
    }

    #[test]
    fn test_infer_br_state() {
        let sp = PhoneNumber::parse("5511999990000").unwrap();
        assert_eq!(sp.infer_br_state(), Some("SP"));
        let ba = PhoneNumber::parse("5571988880000").unwrap();
        assert_eq!(ba.infer_br_state(), Some("BA"));
        let us = PhoneNumber::parse("14155550100").unwrap();
        assert_eq!(us.infer_br_state(), None);
    }

    #[test]
    fn test_message_state_monotone() {
        use MessageState::*;
        assert!(Queued.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Read));
        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Sent));
        assert!(!Deleted.can_advance_to(Read));
    }

    #[test]
    fn test_campaign_status_machine() {
        use CampaignStatus::*;
        assert!(Draft.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        // failed requires an explicit operator reset
        assert!(!Failed.can_transition_to(Running));
        assert!(Failed.can_transition_to(Draft));
    }

    #[test]
    fn test_campaign_contact_dag_never_returns_to_pending() {
        use CampaignContactStatus::*;
        let all = [Pending, Queued, Sent, Delivered, Failed, Skipped];
        for from in all {
            assert!(
                !from.can_transition_to(Pending),
                "{} must not return to pending",
                from
            );
        }
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(
            EventKind::from_wire("messages.upsert"),
            Some(EventKind::MessageUpsert)
        );
        assert_eq!(
            EventKind::from_wire("connection.update"),
            Some(EventKind::ConnectionUpdate)
        );
        assert_eq!(EventKind::from_wire("typing.start"), None);
    }
}
