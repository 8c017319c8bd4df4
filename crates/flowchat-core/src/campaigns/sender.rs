//! Campaign send consumer
//!
//! Drains the durable `campaign_send` queue. Each job carries the business
//! key (campaign, contact row, message index); the consumer checks the
//! store before acting, so at-least-once redelivery never double-settles a
//! row. On success the outbound message is persisted into the conversation
//! and the gateway id is fingerprinted, which absorbs the gateway's own
//! webhook echo of the send.

use crate::bus::{DurableQueue, JobEnvelope, JobKind, QUEUE_CAMPAIGN_SEND};
use crate::campaigns::template::render_template;
use crate::conversations::ConversationService;
use crate::gateway::client::{GatewayClient, GatewayError, MediaRef};
use crate::metrics::Metrics;
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::registry::{FailureKind, InstanceRegistry};
use flowchat_common::types::{
    EventKind, Fingerprint, MessageDirection, MessageState, PhoneNumber,
};
use flowchat_storage::db::DatabasePool;
use flowchat_storage::models::{
    Campaign, CampaignContact, CampaignMessage, Contact, CreateCampaignLog, CreateMessage,
    GatewayInstance, Job, Tenant,
};
use flowchat_storage::repository::{
    CampaignContactRepository, CampaignLogRepository, CampaignRepository, ContactRepository,
    FingerprintRepository, TenantRepository, TenantRepositoryTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dedup window shared with the ingestor
const DEDUP_WINDOW_HOURS: i64 = 48;

/// Campaign send consumer
#[derive(Clone)]
pub struct SendConsumer {
    durable: DurableQueue,
    campaigns: CampaignRepository,
    contact_rows: CampaignContactRepository,
    contacts: ContactRepository,
    logs: CampaignLogRepository,
    fingerprints: FingerprintRepository,
    tenants: Arc<TenantRepository>,
    registry: InstanceRegistry,
    gateway: GatewayClient,
    service: ConversationService,
    hub: RealtimeHub,
    metrics: Metrics,
    poll_interval: Duration,
    concurrency: usize,
    batch_size: i64,
}

impl SendConsumer {
    /// Create a new send consumer
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: &DatabasePool,
        durable: DurableQueue,
        registry: InstanceRegistry,
        gateway: GatewayClient,
        service: ConversationService,
        hub: RealtimeHub,
        metrics: Metrics,
        poll_interval_secs: u64,
        concurrency: usize,
        batch_size: i64,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            durable,
            campaigns: CampaignRepository::new(pool.clone()),
            contact_rows: CampaignContactRepository::new(pool.clone()),
            contacts: ContactRepository::new(pool.clone()),
            logs: CampaignLogRepository::new(pool.clone()),
            fingerprints: FingerprintRepository::new(pool),
            tenants: Arc::new(TenantRepository::new(db_pool.clone())),
            registry,
            gateway,
            service,
            hub,
            metrics,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            concurrency,
            batch_size,
        }
    }

    /// Run the consumer until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut ticker = interval(self.poll_interval);

        info!(
            concurrency = self.concurrency,
            batch = self.batch_size,
            "Send consumer started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.drain(&semaphore).await {
                        error!(error = %e, "Error draining send queue");
                    }
                }
            }
        }

        info!("Send consumer stopped");
    }

    async fn drain(&self, semaphore: &Arc<Semaphore>) -> Result<(), sqlx::Error> {
        let jobs = self
            .durable
            .claim_ready(QUEUE_CAMPAIGN_SEND, self.batch_size)
            .await?;
        if jobs.is_empty() {
            return Ok(());
        }

        debug!(count = jobs.len(), "Claimed send jobs");

        let mut handles = Vec::new();
        for job in jobs {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let consumer = self.clone();
            handles.push(tokio::spawn(async move {
                consumer.process(job).await;
                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Send task panicked");
            }
        }

        Ok(())
    }

    async fn process(&self, job: Job) {
        let envelope = match JobEnvelope::decode(&job.payload) {
            Ok(envelope) => envelope,
            Err(reason) => {
                warn!(job_id = %job.id, %reason, "Unusable send job parked");
                let _ = self.durable.fail_permanent(job.id, &reason).await;
                return;
            }
        };

        let JobKind::CampaignSend {
            campaign_id,
            campaign_contact_id,
            message_index,
            instance_id,
            is_after_hours_auto,
        } = envelope.kind
        else {
            let _ = self
                .durable
                .fail_permanent(job.id, "Wrong job kind on send queue")
                .await;
            return;
        };

        // idempotency: a settled row means this is a replay
        let contact_row = match self.contact_rows.get(campaign_contact_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                let _ = self
                    .durable
                    .fail_permanent(job.id, "Campaign contact row vanished")
                    .await;
                return;
            }
            Err(e) => {
                let _ = self.durable.fail(&job, &e.to_string()).await;
                return;
            }
        };
        if contact_row
            .status_enum()
            .map(|s| s.is_terminal())
            .unwrap_or(false)
        {
            debug!(job_id = %job.id, "Replay for settled contact dropped");
            let _ = self.durable.complete(job.id).await;
            return;
        }

        match self
            .dispatch(
                &job,
                campaign_id,
                &contact_row,
                message_index,
                instance_id,
                is_after_hours_auto,
            )
            .await
        {
            Ok(()) => {
                let _ = self.durable.complete(job.id).await;
            }
            Err(DispatchError::Transient(reason)) => {
                self.metrics.sends_total.with_label_values(&["transient_error"]).inc();
                let _ = self.registry.record_failure(instance_id, FailureKind::Transient).await;
                let exhausted = job.attempts + 1 >= job.max_attempts;
                let _ = self.contact_rows.record_attempt(contact_row.id, &reason).await;
                let _ = self.durable.fail(&job, &reason).await;
                if exhausted {
                    self.settle_failure(campaign_id, &contact_row, &reason).await;
                }
            }
            Err(DispatchError::Permanent(reason)) => {
                self.metrics.sends_total.with_label_values(&["permanent_error"]).inc();
                let _ = self.registry.record_failure(instance_id, FailureKind::Permanent).await;
                let _ = self.durable.fail_permanent(job.id, &reason).await;
                self.settle_failure(campaign_id, &contact_row, &reason).await;
            }
            Err(DispatchError::Skip(reason)) => {
                let _ = self.contact_rows.mark_skipped(contact_row.id, &reason).await;
                let _ = self.durable.complete(job.id).await;
            }
            Err(DispatchError::Storage(e)) => {
                let _ = self.durable.fail(&job, &e).await;
            }
        }
    }

    async fn dispatch(
        &self,
        job: &Job,
        campaign_id: flowchat_common::types::CampaignId,
        contact_row: &CampaignContact,
        message_index: i32,
        instance_id: flowchat_common::types::InstanceId,
        is_after_hours_auto: bool,
    ) -> Result<(), DispatchError> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| DispatchError::Permanent("Campaign vanished".to_string()))?;

        let tenant = self
            .tenants
            .get(campaign.tenant_id)
            .await
            .map_err(|e| DispatchError::Storage(e.to_string()))?
            .ok_or_else(|| DispatchError::Permanent("Tenant vanished".to_string()))?;

        let contact = self
            .contacts
            .get_by_tenant(campaign.tenant_id, contact_row.contact_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| DispatchError::Skip("Contact vanished".to_string()))?;

        let Some(phone) = PhoneNumber::parse(&contact.phone) else {
            return Err(DispatchError::Skip(format!(
                "Unsendable phone: {}",
                contact.phone
            )));
        };

        let instance = self
            .registry
            .get_fresh(instance_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| DispatchError::Transient("Instance vanished".to_string()))?;

        // the registry is the source of truth for the daily counter
        if !instance.is_eligible() {
            return Err(DispatchError::Transient(format!(
                "Instance {} not eligible",
                instance.name
            )));
        }

        let messages = self
            .campaigns
            .list_messages(campaign_id)
            .await
            .map_err(storage)?;
        let template = messages
            .get(message_index as usize)
            .ok_or_else(|| DispatchError::Permanent("Message index out of range".to_string()))?;
        let is_final = message_index as usize == messages.len() - 1;

        let receipt = self
            .send_one(&tenant, &instance, &contact, &phone, template, is_after_hours_auto)
            .await?;

        // success: registry counters and health, campaign bookkeeping
        self.registry
            .record_success(instance.id)
            .await
            .map_err(storage)?;
        self.metrics.sends_total.with_label_values(&["sent"]).inc();

        if is_final {
            self.contact_rows
                .mark_sent(contact_row.id, &instance.name, &receipt.gateway_id)
                .await
                .map_err(storage)?;

            let cursor = campaign
                .instance_ids_vec()
                .iter()
                .position(|id| *id == instance.id)
                .map(|p| p as i32)
                .unwrap_or(campaign.instance_cursor);
            self.campaigns
                .record_sent(campaign_id, &instance.name, cursor)
                .await
                .map_err(storage)?;
        }

        self.persist_outbound(&campaign, &instance, &contact, template, &receipt.gateway_id)
            .await;

        info!(
            campaign_id = %campaign_id,
            contact_id = %contact.id,
            message_index,
            instance = %instance.name,
            gateway_id = %receipt.gateway_id,
            "Campaign message dispatched"
        );

        Ok(())
    }

    async fn send_one(
        &self,
        tenant: &Tenant,
        instance: &GatewayInstance,
        contact: &Contact,
        phone: &PhoneNumber,
        template: &CampaignMessage,
        is_after_hours_auto: bool,
    ) -> Result<crate::gateway::SendReceipt, DispatchError> {
        let mut body = render_template(&template.content, contact);
        if is_after_hours_auto {
            if let Some(after_hours) = &tenant.after_hours_message {
                body = format!("{}\n\n{}", after_hours, body);
            }
        }

        let timer = self.metrics.gateway_latency.start_timer();
        let result = if template.kind == "media" {
            let media = MediaRef {
                url: template.media_url.clone().unwrap_or_default(),
                mime_type: None,
                file_name: None,
            };
            let caption = template
                .caption
                .as_ref()
                .map(|c| render_template(c, contact));
            self.gateway
                .send_media(instance, phone, &media, caption.as_deref())
                .await
        } else {
            self.gateway.send_text(instance, phone, &body, None).await
        };
        timer.observe_duration();

        result.map_err(|e| match e {
            GatewayError::InvalidRecipient(r) => {
                DispatchError::Skip(format!("Invalid recipient: {}", r))
            }
            e if e.is_transient() => DispatchError::Transient(e.to_string()),
            e => DispatchError::Permanent(e.to_string()),
        })
    }

    /// Persist the outbound message into the conversation and fingerprint
    /// the gateway id so the webhook echo of this send is deduplicated.
    async fn persist_outbound(
        &self,
        campaign: &Campaign,
        instance: &GatewayInstance,
        contact: &Contact,
        template: &CampaignMessage,
        gateway_id: &str,
    ) {
        let resolved = match self
            .service
            .resolve_inbound(campaign.tenant_id, instance.id, &contact.phone, None, None)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Failed to resolve conversation for campaign send");
                return;
            }
        };

        let row = match self
            .service
            .messages()
            .append(CreateMessage {
                conversation_id: resolved.conversation.id,
                tenant_id: campaign.tenant_id,
                direction: MessageDirection::Outgoing,
                content: Some(render_template(&template.content, contact)),
                sender_name: Some(campaign.name.clone()),
                sender_phone: None,
                reply_to_id: None,
                state: MessageState::Sent,
                external_id: Some(gateway_id.to_string()),
                gateway_timestamp: None,
            })
            .await
        {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "Failed to persist outbound campaign message");
                return;
            }
        };

        let fingerprint = Fingerprint {
            instance_id: instance.id,
            external_id: gateway_id.to_string(),
            kind: EventKind::MessageUpsert,
        };
        if let Err(e) = self
            .fingerprints
            .check_and_record(&fingerprint, chrono::Duration::hours(DEDUP_WINDOW_HOURS))
            .await
        {
            warn!(error = %e, "Failed to fingerprint outbound send");
        }

        self.hub
            .publish_to_conversation(
                resolved.conversation.id,
                RealtimeEvent::MessageNew(
                    serde_json::to_value(&row).unwrap_or(serde_json::Value::Null),
                ),
            )
            .await;
    }

    async fn settle_failure(
        &self,
        campaign_id: flowchat_common::types::CampaignId,
        contact_row: &CampaignContact,
        reason: &str,
    ) {
        if self
            .contact_rows
            .mark_failed(contact_row.id, reason)
            .await
            .unwrap_or(false)
        {
            let _ = self.campaigns.record_failed(campaign_id).await;
            if let Ok(Some(campaign)) = self.campaigns.get(campaign_id).await {
                let _ = self
                    .logs
                    .append(CreateCampaignLog {
                        campaign_id,
                        tenant_id: campaign.tenant_id,
                        log_type: "send_failure".to_string(),
                        severity: "error".to_string(),
                        message: format!("Contact send failed: {}", reason),
                        details: serde_json::json!({
                            "campaign_contact_id": contact_row.id,
                            "attempts": contact_row.attempts + 1,
                        }),
                    })
                    .await;
            }
        }
    }
}

#[derive(Debug)]
enum DispatchError {
    /// Retried with backoff by the durable lane
    Transient(String),
    /// Never retried; the contact row fails
    Permanent(String),
    /// The row should be skipped, not failed (e.g. invalid phone)
    Skip(String),
    /// Storage hiccup: job retried, row left untouched
    Storage(String),
}

fn storage(e: sqlx::Error) -> DispatchError {
    DispatchError::Storage(e.to_string())
}
