//! Campaign engine
//!
//! One supervised runner per running campaign. The runner drives the
//! execution loop: gates, FIFO contact pick, instance selection, durable
//! enqueue, then a randomized pacing delay. Exactly one dispatch is in
//! flight per campaign at a time, which is what gives per-campaign FIFO
//! ordering. Pause and cancel take effect between sends; an in-flight
//! gateway call always finishes.

use crate::bus::{DurableQueue, JobKind};
use crate::campaigns::calendar::BusinessCalendar;
use crate::entitlements::{EntitlementGate, METRIC_CAMPAIGNS_PER_MONTH};
use crate::registry::InstanceRegistry;
use chrono::Utc;
use flowchat_common::types::{CampaignId, CampaignStatus, TenantId};
use flowchat_storage::db::DatabasePool;
use flowchat_storage::models::{Campaign, CreateCampaignLog};
use flowchat_storage::repository::{
    CampaignContactRepository, CampaignLogRepository, CampaignRepository, TenantRepository,
    TenantRepositoryTrait,
};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the supervisor looks for scheduled campaigns
const SUPERVISOR_TICK: Duration = Duration::from_secs(5);

/// Poll interval while waiting for an in-flight dispatch
const DISPATCH_POLL: Duration = Duration::from_millis(500);

/// Ceiling on waiting for one dispatch (covers the full retry ladder)
const DISPATCH_WAIT_MAX: Duration = Duration::from_secs(6 * 3600);

/// Campaign engine errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Invalid status transition from {from}")]
    InvalidTransition { from: String },

    #[error("Campaign has no contacts")]
    NoContacts,

    #[error("Campaign has no messages")]
    NoMessages,

    #[error("Entitlement denied for {metric}: {current}/{limit}")]
    EntitlementDenied {
        metric: String,
        current: i64,
        limit: i64,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Campaign engine and runner supervisor
#[derive(Clone)]
pub struct CampaignEngine {
    campaigns: CampaignRepository,
    contacts: CampaignContactRepository,
    logs: CampaignLogRepository,
    tenants: Arc<TenantRepository>,
    calendar: BusinessCalendar,
    registry: InstanceRegistry,
    durable: DurableQueue,
    gate: Arc<EntitlementGate>,
    runners: Arc<RwLock<HashMap<CampaignId, CancellationToken>>>,
}

impl CampaignEngine {
    /// Create a new campaign engine
    pub fn new(
        db_pool: &DatabasePool,
        calendar: BusinessCalendar,
        registry: InstanceRegistry,
        durable: DurableQueue,
        gate: Arc<EntitlementGate>,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            contacts: CampaignContactRepository::new(pool.clone()),
            logs: CampaignLogRepository::new(pool),
            tenants: Arc::new(TenantRepository::new(db_pool.clone())),
            calendar,
            registry,
            durable,
            gate,
            runners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle operations (API-facing)
    // ------------------------------------------------------------------

    /// `draft -> scheduled`: freeze the audience and validate the campaign
    pub async fn schedule(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        if campaign.status_enum() != Some(CampaignStatus::Draft) {
            return Err(CampaignError::InvalidTransition {
                from: campaign.status.clone(),
            });
        }

        let counts = self.contacts.status_counts(campaign_id).await?;
        if counts.total() == 0 {
            return Err(CampaignError::NoContacts);
        }
        if self.campaigns.list_messages(campaign_id).await?.is_empty() {
            return Err(CampaignError::NoMessages);
        }

        self.campaigns
            .set_total_contacts(campaign_id, counts.total() as i32)
            .await?;

        let updated = self
            .campaigns
            .transition_status(campaign_id, CampaignStatus::Draft, CampaignStatus::Scheduled, None)
            .await?
            .ok_or(CampaignError::NotFound)?;

        self.log(
            &updated,
            "lifecycle",
            "info",
            &format!("Campaign scheduled with {} contacts", counts.total()),
        )
        .await;

        info!(%campaign_id, contacts = counts.total(), "Campaign scheduled");
        Ok(updated)
    }

    /// `scheduled -> running`: passes the entitlement gate and spawns the
    /// runner. Draft campaigns are scheduled implicitly first.
    pub async fn start(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        if campaign.status_enum() == Some(CampaignStatus::Draft) {
            self.schedule(tenant_id, campaign_id).await?;
        }

        match self.gate.require(tenant_id, METRIC_CAMPAIGNS_PER_MONTH).await {
            Ok(_) => {}
            Err(flowchat_common::Error::EntitlementDenied {
                metric,
                current,
                limit,
            }) => {
                return Err(CampaignError::EntitlementDenied {
                    metric,
                    current,
                    limit,
                })
            }
            Err(e) => return Err(CampaignError::Internal(anyhow::anyhow!(e))),
        }

        let updated = self
            .campaigns
            .transition_status(
                campaign_id,
                CampaignStatus::Scheduled,
                CampaignStatus::Running,
                None,
            )
            .await?
            .ok_or_else(|| CampaignError::InvalidTransition {
                from: campaign.status.clone(),
            })?;

        self.log(&updated, "lifecycle", "info", "Campaign started").await;
        self.spawn_runner(campaign_id).await;
        Ok(updated)
    }

    /// `running -> paused`. Takes effect between sends.
    pub async fn pause(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        reason: &str,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        let updated = self
            .campaigns
            .transition_status(
                campaign_id,
                CampaignStatus::Running,
                CampaignStatus::Paused,
                Some(reason),
            )
            .await?
            .ok_or_else(|| CampaignError::InvalidTransition {
                from: campaign.status.clone(),
            })?;

        self.stop_runner(campaign_id).await;
        self.log(&updated, "lifecycle", "info", &format!("Campaign paused: {}", reason))
            .await;
        Ok(updated)
    }

    /// `paused -> running`: resumes from the next pending row
    pub async fn resume(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        let updated = self
            .campaigns
            .transition_status(
                campaign_id,
                CampaignStatus::Paused,
                CampaignStatus::Running,
                None,
            )
            .await?
            .ok_or_else(|| CampaignError::InvalidTransition {
                from: campaign.status.clone(),
            })?;

        self.log(&updated, "lifecycle", "info", "Campaign resumed").await;
        self.spawn_runner(campaign_id).await;
        Ok(updated)
    }

    /// Cancel: like pause, but terminal
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        let from = campaign
            .status_enum()
            .ok_or_else(|| CampaignError::InvalidTransition {
                from: campaign.status.clone(),
            })?;

        let updated = self
            .campaigns
            .transition_status(campaign_id, from, CampaignStatus::Cancelled, None)
            .await?
            .ok_or_else(|| CampaignError::InvalidTransition {
                from: campaign.status.clone(),
            })?;

        self.stop_runner(campaign_id).await;
        self.log(&updated, "lifecycle", "warning", "Campaign cancelled").await;
        Ok(updated)
    }

    /// Operator reset: `failed -> draft`, the only way out of failed
    pub async fn reset(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        let updated = self
            .campaigns
            .transition_status(campaign_id, CampaignStatus::Failed, CampaignStatus::Draft, None)
            .await?
            .ok_or_else(|| CampaignError::InvalidTransition {
                from: campaign.status.clone(),
            })?;

        self.log(&updated, "lifecycle", "info", "Campaign reset to draft")
            .await;
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Supervisor
    // ------------------------------------------------------------------

    /// Run the engine supervisor: resumes runners for campaigns already in
    /// `running`, then promotes scheduled campaigns whose start time has
    /// arrived. Shuts down deterministically through the token.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Campaign engine supervisor started");

        match self.campaigns.list_running_ids().await {
            Ok(ids) => {
                for id in ids {
                    info!(campaign_id = %id, "Resuming running campaign");
                    self.spawn_runner(id).await;
                }
            }
            Err(e) => error!(error = %e, "Failed to resume running campaigns"),
        }

        let mut ticker = interval(SUPERVISOR_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.promote_scheduled().await {
                        error!(error = %e, "Error promoting scheduled campaigns");
                    }
                }
            }
        }

        // stop all runners on shutdown
        let runners = {
            let mut map = self.runners.write().await;
            std::mem::take(&mut *map)
        };
        for (_, token) in runners {
            token.cancel();
        }
        info!("Campaign engine supervisor stopped");
    }

    async fn promote_scheduled(&self) -> Result<(), sqlx::Error> {
        for campaign in self.campaigns.list_scheduled_ready().await? {
            // the explicit start path already gated entitlements; the timer
            // path gates here
            if let Err(e) = self
                .gate
                .require(campaign.tenant_id, METRIC_CAMPAIGNS_PER_MONTH)
                .await
            {
                warn!(campaign_id = %campaign.id, error = %e, "Scheduled campaign blocked by entitlement");
                continue;
            }

            if let Some(updated) = self
                .campaigns
                .transition_status(
                    campaign.id,
                    CampaignStatus::Scheduled,
                    CampaignStatus::Running,
                    None,
                )
                .await?
            {
                info!(campaign_id = %updated.id, "Scheduled campaign started");
                self.log(&updated, "lifecycle", "info", "Scheduled start time reached")
                    .await;
                self.spawn_runner(updated.id).await;
            }
        }
        Ok(())
    }

    async fn spawn_runner(&self, campaign_id: CampaignId) {
        let mut runners = self.runners.write().await;
        if runners.contains_key(&campaign_id) {
            return;
        }

        let token = CancellationToken::new();
        runners.insert(campaign_id, token.clone());
        drop(runners);

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_campaign(campaign_id, token).await;
            engine.runners.write().await.remove(&campaign_id);
        });
    }

    async fn stop_runner(&self, campaign_id: CampaignId) {
        if let Some(token) = self.runners.write().await.remove(&campaign_id) {
            token.cancel();
        }
    }

    // ------------------------------------------------------------------
    // Runner
    // ------------------------------------------------------------------

    async fn run_campaign(&self, campaign_id: CampaignId, cancel: CancellationToken) {
        info!(%campaign_id, "Campaign runner started");
        let mut consecutive_errors = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.step(campaign_id, &cancel).await {
                Ok(StepOutcome::Continue) => {
                    consecutive_errors = 0;
                }
                Ok(StepOutcome::Stop) => break,
                Err(e) => {
                    consecutive_errors += 1;
                    error!(%campaign_id, error = %e, consecutive_errors, "Campaign step failed");

                    // a persistently broken campaign is parked as failed and
                    // stays terminal until an operator resets it to draft
                    if consecutive_errors >= 10 {
                        if let Ok(Some(updated)) = self
                            .campaigns
                            .transition_status(
                                campaign_id,
                                CampaignStatus::Running,
                                CampaignStatus::Failed,
                                Some("runner_errors"),
                            )
                            .await
                        {
                            self.log(
                                &updated,
                                "lifecycle",
                                "error",
                                "Campaign failed after repeated runner errors",
                            )
                            .await;
                        }
                        break;
                    }

                    if !sleep_cancellable(&cancel, Duration::from_secs(5)).await {
                        break;
                    }
                }
            }
        }

        info!(%campaign_id, "Campaign runner stopped");
    }

    async fn step(
        &self,
        campaign_id: CampaignId,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, sqlx::Error> {
        // reload every iteration: pause/cancel land between sends
        let Some(campaign) = self.campaigns.get(campaign_id).await? else {
            return Ok(StepOutcome::Stop);
        };
        if campaign.status_enum() != Some(CampaignStatus::Running) {
            return Ok(StepOutcome::Stop);
        }

        // gate: tenant still active?
        let tenant = match self.tenants.get(campaign.tenant_id).await {
            Ok(Some(t)) if t.is_active() => t,
            Ok(_) => {
                warn!(%campaign_id, "Tenant inactive; pausing campaign");
                self.auto_pause(&campaign, "tenant_inactive").await?;
                return Ok(StepOutcome::Stop);
            }
            Err(e) => {
                error!(%campaign_id, error = %e, "Tenant lookup failed");
                return Ok(StepOutcome::Continue);
            }
        };

        // gate: business hours and holidays
        let mut after_hours = false;
        if campaign.respect_business_hours {
            if !self.calendar.is_open_now(&tenant).await? {
                let next = self.calendar.next_open(&tenant).await?;
                let Some(next) = next else {
                    self.auto_pause(&campaign, "no_open_window").await?;
                    return Ok(StepOutcome::Stop);
                };
                let wait = (next - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(60));
                debug!(%campaign_id, wait_secs = wait.as_secs(), "Waiting for business hours");
                if !sleep_cancellable(cancel, wait.min(Duration::from_secs(300))).await {
                    return Ok(StepOutcome::Stop);
                }
                return Ok(StepOutcome::Continue);
            }
        } else if let Ok(open) = self.calendar.is_open_now(&tenant).await {
            // sending anyway outside hours tags the dispatch so the consumer
            // prepends the tenant's after-hours reply
            after_hours = !open;
        }

        // next row, FIFO by insertion
        let Some(contact_row) = self.contacts.next_pending(campaign_id).await? else {
            let counts = self.contacts.status_counts(campaign_id).await?;
            if counts.queued > 0 {
                // a dispatch is still settling
                if !sleep_cancellable(cancel, Duration::from_secs(1)).await {
                    return Ok(StepOutcome::Stop);
                }
                return Ok(StepOutcome::Continue);
            }

            if let Some(updated) = self
                .campaigns
                .transition_status(
                    campaign_id,
                    CampaignStatus::Running,
                    CampaignStatus::Completed,
                    None,
                )
                .await?
            {
                self.log(
                    &updated,
                    "lifecycle",
                    "info",
                    &format!(
                        "Campaign completed: {} sent, {} failed, {} skipped",
                        counts.sent + counts.delivered,
                        counts.failed,
                        counts.skipped
                    ),
                )
                .await;
                info!(%campaign_id, "Campaign completed");
            }
            return Ok(StepOutcome::Stop);
        };

        // instance selection among the assigned set
        let assigned = campaign.instance_ids_vec();
        let Some(instance) = self
            .registry
            .select_instance(campaign.tenant_id, &assigned)
            .await?
        else {
            self.auto_pause(&campaign, "no_instance_available").await?;
            return Ok(StepOutcome::Stop);
        };

        let message_count = self.campaigns.list_messages(campaign_id).await?.len() as i32;
        if message_count == 0 {
            self.auto_pause(&campaign, "no_messages").await?;
            return Ok(StepOutcome::Stop);
        }

        if !self.contacts.mark_queued(contact_row.id).await? {
            // lost a race; somebody else settled this row
            return Ok(StepOutcome::Continue);
        }

        // one dispatch at a time: enqueue each template in order and wait
        for index in 0..message_count {
            let job_id = self
                .durable
                .enqueue(JobKind::CampaignSend {
                    campaign_id,
                    campaign_contact_id: contact_row.id,
                    message_index: index,
                    instance_id: instance.id,
                    is_after_hours_auto: after_hours,
                })
                .await?;

            let outcome = self.wait_for_job(job_id, cancel).await?;
            if outcome != JobOutcome::Completed {
                // the consumer has already settled the contact row
                return Ok(StepOutcome::Continue);
            }

            // pacing between every send
            let delay = sample_delay(campaign.min_delay_secs, campaign.max_delay_secs);
            if !sleep_cancellable(cancel, delay).await {
                return Ok(StepOutcome::Stop);
            }
        }

        Ok(StepOutcome::Continue)
    }

    async fn wait_for_job(
        &self,
        job_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, sqlx::Error> {
        let started = tokio::time::Instant::now();

        loop {
            match self.durable.job_status(job_id).await?.as_deref() {
                Some("completed") => return Ok(JobOutcome::Completed),
                Some("failed") | None => return Ok(JobOutcome::Failed),
                _ => {}
            }

            if started.elapsed() > DISPATCH_WAIT_MAX {
                warn!(%job_id, "Dispatch wait ceiling reached");
                return Ok(JobOutcome::Failed);
            }

            // pause/cancel let the in-flight call finish; the sleep is only
            // interrupted so the loop re-reads status promptly
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(DISPATCH_POLL) => {}
            }
            if cancel.is_cancelled() {
                // keep polling briefly so an in-flight send can settle
                tokio::time::sleep(DISPATCH_POLL).await;
                match self.durable.job_status(job_id).await?.as_deref() {
                    Some("completed") => return Ok(JobOutcome::Completed),
                    _ => return Ok(JobOutcome::Failed),
                }
            }
        }
    }

    async fn auto_pause(&self, campaign: &Campaign, reason: &str) -> Result<(), sqlx::Error> {
        if let Some(updated) = self
            .campaigns
            .transition_status(
                campaign.id,
                CampaignStatus::Running,
                CampaignStatus::Paused,
                Some(reason),
            )
            .await?
        {
            self.log(
                &updated,
                "auto_pause",
                "warning",
                &format!("Campaign auto-paused: {}", reason),
            )
            .await;
            warn!(campaign_id = %campaign.id, reason, "Campaign auto-paused");
        }
        Ok(())
    }

    async fn log(&self, campaign: &Campaign, log_type: &str, severity: &str, message: &str) {
        let entry = CreateCampaignLog {
            campaign_id: campaign.id,
            tenant_id: campaign.tenant_id,
            log_type: log_type.to_string(),
            severity: severity.to_string(),
            message: message.to_string(),
            details: serde_json::json!({}),
        };
        if let Err(e) = self.logs.append(entry).await {
            error!(campaign_id = %campaign.id, error = %e, "Failed to append campaign log");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Failed,
}

/// Uniformly sampled pacing delay in `[min, max]` seconds
fn sample_delay(min_secs: i32, max_secs: i32) -> Duration {
    let min = min_secs.max(0) as u64;
    let max = (max_secs.max(min_secs)).max(0) as u64;
    if max <= min {
        return Duration::from_secs(min);
    }
    let millis = rand::thread_rng().gen_range((min * 1000)..=(max * 1000));
    Duration::from_millis(millis)
}

/// Sleep unless cancelled; returns false when cancelled
async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_delay_within_bounds() {
        for _ in 0..200 {
            let d = sample_delay(2, 4);
            assert!(d >= Duration::from_secs(2), "delay {:?} below min", d);
            assert!(d <= Duration::from_secs(4), "delay {:?} above max", d);
        }
    }

    #[test]
    fn test_sample_delay_degenerate_range() {
        assert_eq!(sample_delay(3, 3), Duration::from_secs(3));
        // inverted bounds collapse to min
        assert_eq!(sample_delay(5, 2), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_cancellable_cancels() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!sleep_cancellable(&token, Duration::from_secs(30)).await);
    }
}
