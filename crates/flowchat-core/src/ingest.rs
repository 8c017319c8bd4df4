//! Inbound ingestor
//!
//! Single admission path for both transports (HTTP webhook and the gateway
//! socket). Every event is resolved to a (tenant, instance), deduplicated
//! by fingerprint inside the 48-hour window, normalized, persisted and
//! fanned out. Malformed payloads are quarantined and acknowledged so the
//! broker never piles up; only storage outages propagate as errors, which
//! is the one case the transport may requeue.

use crate::bus::{DurableQueue, FastLane, JobKind};
use crate::conversations::ConversationService;
use crate::profile::{ProfilePictureTask, QUEUE_PROFILE_PICTURES};
use crate::gateway::events::{self, GatewayEvent, InboundEvent, InboundMessage};
use crate::metrics::Metrics;
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::registry::InstanceRegistry;
use crate::routing::Router;
use flowchat_common::types::{Fingerprint, MessageDirection, MessageState, PhoneNumber};
use flowchat_common::Error;
use flowchat_storage::db::DatabasePool;
use flowchat_storage::models::{CreateAttachment, CreateContact, CreateMessage, GatewayInstance};
use flowchat_storage::repository::{
    AttachmentRepository, CampaignContactRepository, CampaignRepository, ContactRepository,
    FingerprintRepository, TenantRepository, TenantRepositoryTrait,
};
use tracing::{debug, info, warn};

/// Dedup window for inbound fingerprints
const DEDUP_WINDOW_HOURS: i64 = 48;

/// What happened to an ingested event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Persisted and fanned out
    Processed,
    /// Dropped by the dedup window (idempotent replay, not an error)
    Deduplicated,
    /// Malformed; parked in quarantine and acknowledged
    Quarantined,
    /// Refused: unknown instance or suspended tenant
    Refused,
}

/// Inbound ingestor
pub struct Ingestor {
    tenants: TenantRepository,
    contacts: ContactRepository,
    attachments: AttachmentRepository,
    fingerprints: FingerprintRepository,
    campaigns: CampaignRepository,
    campaign_contacts: CampaignContactRepository,
    instances: flowchat_storage::repository::InstanceRepository,
    service: ConversationService,
    router: Router,
    registry: InstanceRegistry,
    durable: DurableQueue,
    fast: Option<FastLane>,
    hub: RealtimeHub,
    metrics: Metrics,
}

impl Ingestor {
    /// Create a new ingestor
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: &DatabasePool,
        service: ConversationService,
        router: Router,
        registry: InstanceRegistry,
        durable: DurableQueue,
        fast: Option<FastLane>,
        hub: RealtimeHub,
        metrics: Metrics,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            tenants: TenantRepository::new(db_pool.clone()),
            contacts: ContactRepository::new(pool.clone()),
            attachments: AttachmentRepository::new(pool.clone()),
            fingerprints: FingerprintRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool.clone()),
            campaign_contacts: CampaignContactRepository::new(pool.clone()),
            instances: flowchat_storage::repository::InstanceRepository::new(pool),
            service,
            router,
            registry,
            durable,
            fast,
            hub,
            metrics,
        }
    }

    /// Ingest one raw gateway event.
    ///
    /// Returns `Err` only for storage outages; every policy decision
    /// (dedup, quarantine, refusal) is a successful outcome so the
    /// transport acknowledges.
    pub async fn handle(&self, raw: &GatewayEvent) -> Result<IngestOutcome, sqlx::Error> {
        // 1. resolve (tenant, instance); unknown instances are refused
        let Some(instance) = self.instances.get_by_external_id(&raw.instance).await? else {
            warn!(instance = %raw.instance, event = %raw.event, "Event for unknown instance");
            self.quarantine(raw, "unknown_instance").await?;
            return Ok(IngestOutcome::Refused);
        };

        // suspended tenants are refused on every admission path
        let tenant_active = self
            .tenants
            .get(instance.tenant_id)
            .await
            .map_err(storage_err)?
            .map(|t| t.is_active())
            .unwrap_or(false);
        if !tenant_active {
            debug!(tenant_id = %instance.tenant_id, "Event refused: tenant not active");
            return Ok(IngestOutcome::Refused);
        }

        // 2. normalize; schema errors go to quarantine, never back to the broker
        let event = match events::normalize(raw) {
            Ok(event) => event,
            Err(Error::MalformedEvent(reason)) => {
                warn!(instance = %raw.instance, %reason, "Malformed event quarantined");
                self.quarantine(raw, &reason).await?;
                self.metrics.events_quarantined.inc();
                return Ok(IngestOutcome::Quarantined);
            }
            Err(e) => {
                warn!(error = %e, "Unexpected normalization failure");
                self.quarantine(raw, &e.to_string()).await?;
                return Ok(IngestOutcome::Quarantined);
            }
        };

        // 3. dedup fingerprint inside the window
        if let Some(dedup_id) = event.dedup_id() {
            let fingerprint = Fingerprint {
                instance_id: instance.id,
                external_id: dedup_id.to_string(),
                kind: event.kind(),
            };
            let fresh = self
                .fingerprints
                .check_and_record(&fingerprint, chrono::Duration::hours(DEDUP_WINDOW_HOURS))
                .await?;
            if !fresh {
                debug!(external_id = dedup_id, kind = %event.kind(), "Duplicate event dropped");
                self.metrics.events_deduped.inc();
                return Ok(IngestOutcome::Deduplicated);
            }
        }

        self.metrics
            .events_ingested
            .with_label_values(&[&event.kind().to_string()])
            .inc();

        // 4. apply
        match event {
            InboundEvent::MessageUpsert(message) => {
                self.apply_message_upsert(&instance, message).await?;
            }
            InboundEvent::MessageUpdate { external_id, state } => {
                self.apply_message_update(&instance, &external_id, state)
                    .await?;
            }
            InboundEvent::MessageDelete { external_id } => {
                self.apply_message_delete(&instance, &external_id).await?;
            }
            InboundEvent::PresenceUpdate {
                contact_phone,
                presence,
            } => {
                debug!(%contact_phone, %presence, "Presence update observed");
            }
            InboundEvent::ConnectionUpdate { state } => {
                self.registry
                    .apply_connection_state(instance.id, state)
                    .await?;
                self.hub
                    .publish_to_tenant(
                        instance.tenant_id,
                        RealtimeEvent::InstanceStateChanged(serde_json::json!({
                            "instance_id": instance.id,
                            "name": instance.name,
                            "connection_state": state,
                        })),
                    )
                    .await;
            }
            InboundEvent::ReactionAdd {
                target_external_id,
                contact_phone,
                emoji,
            } => {
                self.apply_reaction(&instance, &target_external_id, &contact_phone, &emoji)
                    .await?;
            }
            InboundEvent::GroupParticipantsUpdate {
                group_id,
                action,
                participants,
            } => {
                // group churn refreshes metadata but is not notification-worthy
                if let Some(conversation) = self
                    .service
                    .conversations()
                    .find_by_identity(
                        instance.tenant_id,
                        instance.id,
                        group_id.split('@').next().unwrap_or(&group_id),
                        Some(&group_id),
                    )
                    .await?
                {
                    self.service
                        .conversations()
                        .merge_group_metadata(
                            conversation.id,
                            &serde_json::json!({
                                "last_participant_action": action,
                                "participants": participants,
                            }),
                        )
                        .await?;
                }
            }
        }

        Ok(IngestOutcome::Processed)
    }

    async fn apply_message_upsert(
        &self,
        instance: &GatewayInstance,
        message: InboundMessage,
    ) -> Result<(), sqlx::Error> {
        // individual chats keep the contact book fresh
        if message.group_id.is_none() && !message.from_me {
            let state_code = PhoneNumber::parse(&message.contact_phone)
                .and_then(|p| p.infer_br_state().map(|s| s.to_string()));
            self.contacts
                .upsert(CreateContact {
                    tenant_id: instance.tenant_id,
                    phone: message.contact_phone.clone(),
                    name: message.sender_name.clone(),
                    state_code,
                    tags: None,
                    custom_vars: None,
                })
                .await?;
        }

        // route only genuine inbound on not-yet-routed conversations
        let department_id = if message.from_me {
            None
        } else {
            match &message.content {
                Some(body) => self.router.route(instance.tenant_id, body).await?,
                None => None,
            }
        };

        let resolved = self
            .service
            .resolve_inbound(
                instance.tenant_id,
                instance.id,
                &message.contact_phone,
                message.group_id.as_deref(),
                department_id,
            )
            .await?;

        let direction = if message.from_me {
            MessageDirection::Outgoing
        } else {
            MessageDirection::Incoming
        };

        // reply references resolve against already-persisted messages
        let reply_to_id = match &message.reply_to_external_id {
            Some(ext) => self
                .service
                .messages()
                .find_by_external_id(instance.id, ext)
                .await?
                .map(|m| m.id),
            None => None,
        };

        let row = self
            .service
            .messages()
            .append(CreateMessage {
                conversation_id: resolved.conversation.id,
                tenant_id: instance.tenant_id,
                direction,
                content: message.content.clone(),
                sender_name: message.sender_name.clone(),
                sender_phone: message.sender_phone.as_ref().map(|p| p.as_str().to_string()),
                reply_to_id,
                state: if message.from_me {
                    MessageState::Sent
                } else {
                    MessageState::Delivered
                },
                external_id: Some(message.external_id.clone()),
                gateway_timestamp: message.gateway_timestamp,
            })
            .await?;

        // media goes through the durable lane: download, cache, re-upload
        if let Some(media) = &message.media {
            let attachment = self
                .attachments
                .create(CreateAttachment {
                    message_id: row.id,
                    tenant_id: instance.tenant_id,
                    kind: media.kind,
                    remote_url: media.url.clone(),
                    mime_type: media.mime_type.clone(),
                    size_bytes: media.size_bytes,
                    duration_secs: media.duration_secs,
                })
                .await?;

            self.durable
                .enqueue(JobKind::ProcessMedia {
                    attachment_id: attachment.id,
                })
                .await?;
        }

        // new individual conversations get a profile picture fetch on the
        // fast lane; losing it is harmless
        if resolved.created && message.group_id.is_none() {
            if let Some(fast) = &self.fast {
                let task = ProfilePictureTask {
                    tenant_id: instance.tenant_id,
                    instance_id: instance.id,
                    phone: message.contact_phone.clone(),
                };
                if let Err(e) = fast.push(QUEUE_PROFILE_PICTURES, &task).await {
                    debug!(error = %e, "Profile fetch enqueue failed");
                }
            }
        }

        // 5. fan-out
        if resolved.created {
            self.hub
                .publish_to_tenant(
                    instance.tenant_id,
                    RealtimeEvent::ConversationNew(
                        serde_json::to_value(&resolved.conversation)
                            .unwrap_or(serde_json::Value::Null),
                    ),
                )
                .await;
        } else if resolved.reopened {
            self.hub
                .publish_to_tenant(
                    instance.tenant_id,
                    RealtimeEvent::ConversationUpdated(
                        serde_json::to_value(&resolved.conversation)
                            .unwrap_or(serde_json::Value::Null),
                    ),
                )
                .await;
        }

        self.hub
            .publish_to_conversation(
                resolved.conversation.id,
                RealtimeEvent::MessageNew(
                    serde_json::to_value(&row).unwrap_or(serde_json::Value::Null),
                ),
            )
            .await;
        self.metrics.realtime_frames.inc();

        info!(
            tenant_id = %instance.tenant_id,
            conversation_id = %resolved.conversation.id,
            message_id = %row.id,
            external_id = %message.external_id,
            "Inbound message persisted"
        );
        Ok(())
    }

    async fn apply_message_update(
        &self,
        instance: &GatewayInstance,
        external_id: &str,
        state: MessageState,
    ) -> Result<(), sqlx::Error> {
        let Some(message) = self
            .service
            .messages()
            .find_by_external_id(instance.id, external_id)
            .await?
        else {
            debug!(external_id, "Receipt for unknown message dropped");
            return Ok(());
        };

        // monotone advance; regressions are silently ignored
        let Some(updated) = self.service.messages().advance_state(message.id, state).await?
        else {
            return Ok(());
        };

        match state {
            MessageState::Delivered => {
                self.registry.record_delivered(instance.id).await?;
                // settle the matching campaign row, when this was a campaign send
                if let Some(contact) = self
                    .campaign_contacts
                    .mark_delivered_by_gateway_id(external_id)
                    .await?
                {
                    self.campaigns.record_delivered(contact.campaign_id).await?;
                }
            }
            MessageState::Read => {
                self.registry.record_read(instance.id).await?;
            }
            _ => {}
        }

        self.hub
            .publish_to_conversation(
                updated.conversation_id,
                RealtimeEvent::MessageUpdated(
                    serde_json::to_value(&updated).unwrap_or(serde_json::Value::Null),
                ),
            )
            .await;
        Ok(())
    }

    async fn apply_message_delete(
        &self,
        instance: &GatewayInstance,
        external_id: &str,
    ) -> Result<(), sqlx::Error> {
        let Some(message) = self
            .service
            .messages()
            .find_by_external_id(instance.id, external_id)
            .await?
        else {
            return Ok(());
        };

        if let Some(updated) = self.service.messages().mark_deleted(message.id).await? {
            self.hub
                .publish_to_conversation(
                    updated.conversation_id,
                    RealtimeEvent::MessageUpdated(
                        serde_json::to_value(&updated).unwrap_or(serde_json::Value::Null),
                    ),
                )
                .await;
        }
        Ok(())
    }

    async fn apply_reaction(
        &self,
        instance: &GatewayInstance,
        target_external_id: &str,
        contact_phone: &str,
        emoji: &str,
    ) -> Result<(), sqlx::Error> {
        let Some(message) = self
            .service
            .messages()
            .find_by_external_id(instance.id, target_external_id)
            .await?
        else {
            return Ok(());
        };

        let inserted = self
            .service
            .messages()
            .add_reaction(
                instance.tenant_id,
                message.id,
                None,
                Some(contact_phone),
                emoji,
            )
            .await?;

        if inserted.is_some() {
            self.hub
                .publish_to_conversation(
                    message.conversation_id,
                    RealtimeEvent::MessageUpdated(
                        serde_json::to_value(&message).unwrap_or(serde_json::Value::Null),
                    ),
                )
                .await;
        }
        Ok(())
    }

    async fn quarantine(&self, raw: &GatewayEvent, reason: &str) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_value(raw).unwrap_or(serde_json::Value::Null);
        self.fingerprints
            .quarantine(Some(&raw.instance), reason, &payload)
            .await
    }
}

fn storage_err(e: flowchat_common::Error) -> sqlx::Error {
    sqlx::Error::Protocol(e.to_string())
}
