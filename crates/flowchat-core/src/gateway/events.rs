//! Gateway event wire model and normalization
//!
//! Webhook bodies and WebSocket frames share the same shape:
//! `{event, instance, data: {key: {id, remoteJid, fromMe}, message,
//! messageTimestamp, ...}}`. `key.id` is the idempotency key. Everything
//! the dispatcher consumes is normalized into [`InboundEvent`] here;
//! payloads that fail normalization go to quarantine.

use chrono::{DateTime, TimeZone, Utc};
use flowchat_common::types::{AttachmentKind, ConnectionState, EventKind, MessageState, PhoneNumber};
use flowchat_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Raw gateway event, as received on either transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub instance: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Message key inside gateway payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayKey {
    pub id: String,
    #[serde(rename = "remoteJid")]
    pub remote_jid: String,
    #[serde(rename = "fromMe", default)]
    pub from_me: bool,
    #[serde(default)]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageData {
    key: GatewayKey,
    #[serde(default)]
    message: Option<MessageContent>,
    #[serde(rename = "pushName", default)]
    push_name: Option<String>,
    #[serde(rename = "messageTimestamp", default)]
    message_timestamp: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageContent {
    #[serde(default)]
    conversation: Option<String>,
    #[serde(rename = "extendedTextMessage", default)]
    extended_text: Option<ExtendedText>,
    #[serde(rename = "imageMessage", default)]
    image: Option<MediaContent>,
    #[serde(rename = "audioMessage", default)]
    audio: Option<MediaContent>,
    #[serde(rename = "videoMessage", default)]
    video: Option<MediaContent>,
    #[serde(rename = "documentMessage", default)]
    document: Option<MediaContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtendedText {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "contextInfo", default)]
    context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContextInfo {
    #[serde(rename = "stanzaId", default)]
    stanza_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaContent {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    mimetype: Option<String>,
    #[serde(rename = "fileLength", default)]
    file_length: Option<serde_json::Value>,
    #[serde(default)]
    seconds: Option<i32>,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReactionData {
    key: GatewayKey,
    #[serde(default)]
    reaction: Option<ReactionBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReactionBody {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConnectionData {
    #[serde(alias = "state", alias = "connection")]
    state: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GroupParticipantsData {
    #[serde(alias = "id", alias = "groupJid")]
    group_jid: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    participants: Vec<String>,
}

/// Media attached to an inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMedia {
    pub kind: AttachmentKind,
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub duration_secs: Option<i32>,
    pub caption: Option<String>,
}

/// A normalized inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub external_id: String,
    /// Conversation identity: the contact's E.164 phone for individual
    /// chats, the group identifier for group chats.
    pub contact_phone: String,
    /// Set when the message arrived in a group
    pub group_id: Option<String>,
    pub from_me: bool,
    pub sender_name: Option<String>,
    pub sender_phone: Option<PhoneNumber>,
    pub content: Option<String>,
    pub reply_to_external_id: Option<String>,
    pub media: Option<InboundMedia>,
    pub gateway_timestamp: Option<DateTime<Utc>>,
}

/// Normalized inbound events, one variant per observed gateway event
#[derive(Debug, Clone)]
pub enum InboundEvent {
    MessageUpsert(InboundMessage),
    MessageUpdate {
        external_id: String,
        state: MessageState,
    },
    MessageDelete {
        external_id: String,
    },
    PresenceUpdate {
        contact_phone: String,
        presence: String,
    },
    ConnectionUpdate {
        state: ConnectionState,
    },
    ReactionAdd {
        target_external_id: String,
        contact_phone: String,
        emoji: String,
    },
    GroupParticipantsUpdate {
        group_id: String,
        action: String,
        participants: Vec<String>,
    },
}

impl InboundEvent {
    /// The event kind, used for the dedup fingerprint
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::MessageUpsert(_) => EventKind::MessageUpsert,
            InboundEvent::MessageUpdate { .. } => EventKind::MessageUpdate,
            InboundEvent::MessageDelete { .. } => EventKind::MessageDelete,
            InboundEvent::PresenceUpdate { .. } => EventKind::PresenceUpdate,
            InboundEvent::ConnectionUpdate { .. } => EventKind::ConnectionUpdate,
            InboundEvent::ReactionAdd { .. } => EventKind::ReactionAdd,
            InboundEvent::GroupParticipantsUpdate { .. } => EventKind::GroupParticipantsUpdate,
        }
    }

    /// The external id used for deduplication, when the event has one
    pub fn dedup_id(&self) -> Option<&str> {
        match self {
            InboundEvent::MessageUpsert(m) => Some(&m.external_id),
            InboundEvent::MessageUpdate { external_id, .. } => Some(external_id),
            InboundEvent::MessageDelete { external_id } => Some(external_id),
            InboundEvent::ReactionAdd {
                target_external_id, ..
            } => Some(target_external_id),
            _ => None,
        }
    }
}

/// Split a remote JID into the conversation identity and an optional group
/// id. Group JIDs carry no usable phone; the sender comes from the
/// participant field instead.
fn split_jid(jid: &str) -> Result<(String, Option<String>)> {
    if jid.ends_with("@g.us") {
        let local = jid.split('@').next().unwrap_or(jid);
        if local.is_empty() {
            return Err(Error::MalformedEvent(format!("Unparseable group jid: {}", jid)));
        }
        Ok((local.to_string(), Some(jid.to_string())))
    } else {
        let phone = PhoneNumber::parse(jid)
            .ok_or_else(|| Error::MalformedEvent(format!("Unparseable jid: {}", jid)))?;
        Ok((phone.as_str().to_string(), None))
    }
}

fn parse_media(content: &MessageContent) -> Option<InboundMedia> {
    let (media, kind) = if let Some(m) = &content.image {
        (m, AttachmentKind::Image)
    } else if let Some(m) = &content.audio {
        (m, AttachmentKind::Audio)
    } else if let Some(m) = &content.video {
        (m, AttachmentKind::Video)
    } else if let Some(m) = &content.document {
        (m, AttachmentKind::Document)
    } else {
        return None;
    };

    let url = media.url.clone()?;
    let size_bytes = media.file_length.as_ref().and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    });

    Some(InboundMedia {
        kind,
        url,
        mime_type: media.mimetype.clone(),
        size_bytes,
        duration_secs: media.seconds,
        caption: media.caption.clone(),
    })
}

/// Normalize a raw gateway event. `Err(MalformedEvent)` sends the payload
/// to quarantine; unknown event names are malformed too.
pub fn normalize(event: &GatewayEvent) -> Result<InboundEvent> {
    let kind = EventKind::from_wire(&event.event)
        .ok_or_else(|| Error::MalformedEvent(format!("Unknown event: {}", event.event)))?;

    match kind {
        EventKind::MessageUpsert => {
            let data: MessageData = parse_data(&event.data)?;
            let (contact_phone, group_id) = split_jid(&data.key.remote_jid)?;

            let sender_phone = data
                .key
                .participant
                .as_deref()
                .and_then(PhoneNumber::parse);

            let (content, reply_to) = match &data.message {
                Some(m) => {
                    let text = m
                        .conversation
                        .clone()
                        .or_else(|| m.extended_text.as_ref().and_then(|e| e.text.clone()));
                    let reply = m
                        .extended_text
                        .as_ref()
                        .and_then(|e| e.context_info.as_ref())
                        .and_then(|c| c.stanza_id.clone());
                    (text, reply)
                }
                None => (None, None),
            };

            let media = data.message.as_ref().and_then(parse_media);

            if content.is_none() && media.is_none() {
                return Err(Error::MalformedEvent(
                    "Message carries neither text nor media".to_string(),
                ));
            }

            Ok(InboundEvent::MessageUpsert(InboundMessage {
                external_id: data.key.id,
                contact_phone,
                group_id,
                from_me: data.key.from_me,
                sender_name: data.push_name,
                sender_phone,
                content,
                reply_to_external_id: reply_to,
                media,
                gateway_timestamp: data
                    .message_timestamp
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            }))
        }

        EventKind::MessageUpdate => {
            let data: MessageData = parse_data(&event.data)?;
            let state = match data.status.as_deref() {
                Some("SERVER_ACK") | Some("sent") => MessageState::Sent,
                Some("DELIVERY_ACK") | Some("delivered") => MessageState::Delivered,
                Some("READ") | Some("read") => MessageState::Read,
                Some("ERROR") | Some("failed") => MessageState::Failed,
                other => {
                    return Err(Error::MalformedEvent(format!(
                        "Unknown message status: {:?}",
                        other
                    )))
                }
            };
            Ok(InboundEvent::MessageUpdate {
                external_id: data.key.id,
                state,
            })
        }

        EventKind::MessageDelete => {
            let data: MessageData = parse_data(&event.data)?;
            Ok(InboundEvent::MessageDelete {
                external_id: data.key.id,
            })
        }

        EventKind::PresenceUpdate => {
            #[derive(Deserialize)]
            struct PresenceData {
                #[serde(alias = "id", alias = "remoteJid")]
                jid: String,
                #[serde(default)]
                presence: Option<String>,
            }
            let data: PresenceData = parse_data(&event.data)?;
            let (contact_phone, _) = split_jid(&data.jid)?;
            Ok(InboundEvent::PresenceUpdate {
                contact_phone,
                presence: data.presence.unwrap_or_else(|| "available".to_string()),
            })
        }

        EventKind::ConnectionUpdate => {
            let data: ConnectionData = parse_data(&event.data)?;
            let state = data
                .state
                .parse()
                .map_err(|_| Error::MalformedEvent(format!("Unknown state: {}", data.state)))?;
            Ok(InboundEvent::ConnectionUpdate { state })
        }

        EventKind::ReactionAdd => {
            let data: ReactionData = parse_data(&event.data)?;
            let (contact_phone, _) = split_jid(&data.key.remote_jid)?;
            let emoji = data
                .reaction
                .and_then(|r| r.text)
                .ok_or_else(|| Error::MalformedEvent("Reaction without emoji".to_string()))?;
            Ok(InboundEvent::ReactionAdd {
                target_external_id: data.key.id,
                contact_phone,
                emoji,
            })
        }

        EventKind::GroupParticipantsUpdate => {
            let data: GroupParticipantsData = parse_data(&event.data)?;
            Ok(InboundEvent::GroupParticipantsUpdate {
                group_id: data.group_jid,
                action: data.action.unwrap_or_else(|| "update".to_string()),
                participants: data.participants,
            })
        }
    }
}

fn parse_data<T: serde::de::DeserializeOwned>(data: &serde_json::Value) -> Result<T> {
    serde_json::from_value(data.clone())
        .map_err(|e| Error::MalformedEvent(format!("Bad event data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn upsert_event(id: &str, jid: &str, text: &str) -> GatewayEvent {
        GatewayEvent {
            event: "messages.upsert".to_string(),
            instance: "acme".to_string(),
            data: serde_json::json!({
                "key": { "id": id, "remoteJid": jid, "fromMe": false },
                "pushName": "Maria",
                "message": { "conversation": text },
                "messageTimestamp": 1718000000
            }),
        }
    }

    #[test]
    fn test_normalize_text_upsert() {
        let event = upsert_event("E1", "5511999990000@s.whatsapp.net", "oi");
        let normalized = normalize(&event).unwrap();

        match normalized {
            InboundEvent::MessageUpsert(m) => {
                assert_eq!(m.external_id, "E1");
                assert_eq!(m.contact_phone, "+5511999990000");
                assert_eq!(m.content.as_deref(), Some("oi"));
                assert_eq!(m.group_id, None);
                assert!(!m.from_me);
                assert!(m.gateway_timestamp.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_normalize_media_upsert() {
        let event = GatewayEvent {
            event: "messages.upsert".to_string(),
            instance: "acme".to_string(),
            data: serde_json::json!({
                "key": { "id": "E2", "remoteJid": "5511999990000@s.whatsapp.net", "fromMe": false },
                "message": {
                    "imageMessage": {
                        "url": "https://gw/media/E2.jpg",
                        "mimetype": "image/jpeg",
                        "fileLength": "20480",
                        "caption": "foto"
                    }
                }
            }),
        };

        match normalize(&event).unwrap() {
            InboundEvent::MessageUpsert(m) => {
                let media = m.media.unwrap();
                assert_eq!(media.kind, AttachmentKind::Image);
                assert_eq!(media.size_bytes, Some(20480));
                assert_eq!(media.caption.as_deref(), Some("foto"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_normalize_delivery_update() {
        let event = GatewayEvent {
            event: "messages.update".to_string(),
            instance: "acme".to_string(),
            data: serde_json::json!({
                "key": { "id": "E1", "remoteJid": "5511999990000@s.whatsapp.net" },
                "status": "DELIVERY_ACK"
            }),
        };

        match normalize(&event).unwrap() {
            InboundEvent::MessageUpdate { external_id, state } => {
                assert_eq!(external_id, "E1");
                assert_eq!(state, MessageState::Delivered);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_malformed() {
        let event = GatewayEvent {
            event: "typing.start".to_string(),
            instance: "acme".to_string(),
            data: serde_json::json!({}),
        };
        assert!(matches!(
            normalize(&event),
            Err(Error::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_empty_message_is_malformed() {
        let event = GatewayEvent {
            event: "messages.upsert".to_string(),
            instance: "acme".to_string(),
            data: serde_json::json!({
                "key": { "id": "E3", "remoteJid": "5511999990000@s.whatsapp.net" },
                "message": {}
            }),
        };
        assert!(matches!(normalize(&event), Err(Error::MalformedEvent(_))));
    }

    #[test]
    fn test_group_message_keeps_group_id() {
        let event = GatewayEvent {
            event: "messages.upsert".to_string(),
            instance: "acme".to_string(),
            data: serde_json::json!({
                "key": {
                    "id": "E4",
                    "remoteJid": "120363041234567890@g.us",
                    "fromMe": false,
                    "participant": "5511988887777@s.whatsapp.net"
                },
                "message": { "conversation": "bom dia" }
            }),
        };

        match normalize(&event).unwrap() {
            InboundEvent::MessageUpsert(m) => {
                assert_eq!(m.contact_phone, "120363041234567890");
                assert_eq!(m.group_id.as_deref(), Some("120363041234567890@g.us"));
                assert_eq!(
                    m.sender_phone.as_ref().map(|p| p.as_str()),
                    Some("+5511988887777")
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
