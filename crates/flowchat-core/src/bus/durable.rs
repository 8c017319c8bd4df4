//! Durable lane - transactional jobs queue
//!
//! At-least-once delivery over the `jobs` table: claims use
//! `FOR UPDATE SKIP LOCKED` so workers never double-claim, retries back off
//! exponentially, and every payload travels in a versioned envelope.
//! Consumers carry a business id and check the store before acting, which
//! makes redelivery idempotent.

use chrono::{DateTime, Duration, Utc};
use flowchat_common::types::{AttachmentId, CampaignContactId, CampaignId, InstanceId};
use flowchat_storage::db::DatabasePool;
use flowchat_storage::models::Job;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current payload schema version
pub const ENVELOPE_VERSION: u32 = 1;

/// Default attempt ceiling for durable work
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Queue names on the durable lane
pub const QUEUE_CAMPAIGN_SEND: &str = "campaign_send";
pub const QUEUE_PROCESS_MEDIA: &str = "process_media";

/// Business payloads carried by durable jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// One campaign dispatch: (campaign, contact row, message index) is the
    /// idempotency key.
    CampaignSend {
        campaign_id: CampaignId,
        campaign_contact_id: CampaignContactId,
        message_index: i32,
        instance_id: InstanceId,
        /// Dispatch happened outside business hours under the after-hours
        /// policy; the informative reply gets prepended.
        #[serde(default)]
        is_after_hours_auto: bool,
    },

    /// Download an inbound attachment and re-upload it permanently
    ProcessMedia { attachment_id: AttachmentId },
}

impl JobKind {
    /// The queue this kind belongs on
    pub fn queue(&self) -> &'static str {
        match self {
            JobKind::CampaignSend { .. } => QUEUE_CAMPAIGN_SEND,
            JobKind::ProcessMedia { .. } => QUEUE_PROCESS_MEDIA,
        }
    }
}

/// Versioned payload envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub v: u32,
    #[serde(flatten)]
    pub kind: JobKind,
}

impl JobEnvelope {
    /// Wrap a job kind in the current envelope version
    pub fn new(kind: JobKind) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            kind,
        }
    }

    /// Decode a stored payload, rejecting unknown schema versions
    pub fn decode(payload: &serde_json::Value) -> Result<Self, String> {
        let envelope: JobEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| format!("Undecodable payload: {}", e))?;
        if envelope.v != ENVELOPE_VERSION {
            return Err(format!("Unknown payload version {}", envelope.v));
        }
        Ok(envelope)
    }
}

/// Exponential backoff for durable retries: 1 min doubling, capped at 4 h
pub fn retry_backoff(attempts: i32) -> Duration {
    let minutes = std::cmp::min(2_i64.pow(attempts.max(0) as u32), 240);
    Duration::minutes(minutes)
}

/// Durable queue over the jobs table
#[derive(Clone)]
pub struct DurableQueue {
    pool: PgPool,
}

impl DurableQueue {
    /// Create a new durable queue
    pub fn new(db_pool: &DatabasePool) -> Self {
        Self {
            pool: db_pool.pool().clone(),
        }
    }

    /// Enqueue a job for immediate execution
    pub async fn enqueue(&self, kind: JobKind) -> Result<Uuid, sqlx::Error> {
        self.enqueue_at(kind, Utc::now()).await
    }

    /// Enqueue a job to run at (or after) a given instant
    pub async fn enqueue_at(
        &self,
        kind: JobKind,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Uuid, sqlx::Error> {
        let job_id = Uuid::now_v7();
        let queue = kind.queue();
        let payload = serde_json::to_value(JobEnvelope::new(kind))
            .map_err(|e| sqlx::Error::Protocol(format!("Unencodable job payload: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, payload, status, attempts, max_attempts, scheduled_at, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, $5, NOW())
            "#,
        )
        .bind(job_id)
        .bind(queue)
        .bind(&payload)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;

        debug!(%job_id, queue, "Durable job enqueued");
        Ok(job_id)
    }

    /// Claim due jobs from a queue. `FOR UPDATE SKIP LOCKED` keeps parallel
    /// workers from double-claiming; each claimed row is flipped to
    /// `processing` with its attempt counted before the transaction commits.
    pub async fn claim_ready(&self, queue: &str, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let jobs: Vec<Job> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending'
              AND queue = $1
              AND scheduled_at <= NOW()
            ORDER BY scheduled_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        for job in &jobs {
            sqlx::query(
                r#"
                UPDATE jobs SET
                    status = 'processing',
                    attempts = attempts + 1,
                    started_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(jobs)
    }

    /// Acknowledge a completed job
    pub async fn complete(&self, job_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a transient failure. The job is requeued with backoff until
    /// it runs out of attempts, then parked as failed.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<(), sqlx::Error> {
        let attempts = job.attempts + 1;
        if attempts >= job.max_attempts {
            warn!(job_id = %job.id, attempts, "Durable job exhausted retries");
            self.fail_permanent(job.id, error).await
        } else {
            let delay = retry_backoff(attempts);
            let scheduled_at = Utc::now() + delay;
            sqlx::query(
                r#"
                UPDATE jobs SET
                    status = 'pending',
                    last_error = $2,
                    scheduled_at = $3
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(error)
            .bind(scheduled_at)
            .execute(&self.pool)
            .await?;

            info!(
                job_id = %job.id,
                retry_at = %scheduled_at,
                attempt = attempts + 1,
                "Durable job scheduled for retry"
            );
            Ok(())
        }
    }

    /// Park a job permanently; it will never be retried automatically
    pub async fn fail_permanent(&self, job_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'failed',
                last_error = $2,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current status of one job, for callers that serialize on completion
    pub async fn job_status(&self, job_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(s,)| s))
    }

    /// Queue depth counters
    pub async fn stats(&self, queue: &str) -> Result<QueueStats, sqlx::Error> {
        let pending: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE status = 'pending' AND queue = $1",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;

        let processing: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE status = 'processing' AND queue = $1",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;

        let failed: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE status = 'failed' AND queue = $1",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: pending.0 as u64,
            processing: processing.0 as u64,
            failed: failed.0 as u64,
        })
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff() {
        assert_eq!(retry_backoff(0), Duration::minutes(1));
        assert_eq!(retry_backoff(1), Duration::minutes(2));
        assert_eq!(retry_backoff(2), Duration::minutes(4));
        assert_eq!(retry_backoff(3), Duration::minutes(8));
        assert_eq!(retry_backoff(10), Duration::minutes(240)); // capped at 4 hours
    }

    #[test]
    fn test_envelope_roundtrip() {
        let kind = JobKind::CampaignSend {
            campaign_id: Uuid::new_v4(),
            campaign_contact_id: Uuid::new_v4(),
            message_index: 0,
            instance_id: Uuid::new_v4(),
            is_after_hours_auto: false,
        };
        let payload = serde_json::to_value(JobEnvelope::new(kind)).unwrap();
        assert_eq!(payload["v"], 1);
        assert_eq!(payload["kind"], "campaign_send");

        let decoded = JobEnvelope::decode(&payload).unwrap();
        assert!(matches!(decoded.kind, JobKind::CampaignSend { .. }));
    }

    #[test]
    fn test_envelope_rejects_unknown_version() {
        let mut payload = serde_json::to_value(JobEnvelope::new(JobKind::ProcessMedia {
            attachment_id: Uuid::new_v4(),
        }))
        .unwrap();
        payload["v"] = serde_json::json!(99);

        let err = JobEnvelope::decode(&payload).unwrap_err();
        assert!(err.contains("version 99"));
    }

    #[test]
    fn test_kind_routes_to_queue() {
        let send = JobKind::CampaignSend {
            campaign_id: Uuid::new_v4(),
            campaign_contact_id: Uuid::new_v4(),
            message_index: 0,
            instance_id: Uuid::new_v4(),
            is_after_hours_auto: false,
        };
        assert_eq!(send.queue(), QUEUE_CAMPAIGN_SEND);

        let media = JobKind::ProcessMedia {
            attachment_id: Uuid::new_v4(),
        };
        assert_eq!(media.queue(), QUEUE_PROCESS_MEDIA);
    }
}
