//! Campaign contact repository
//!
//! Status moves through a one-way DAG: `pending -> queued -> sent ->
//! delivered`, with `failed`/`skipped` as terminal branches. Every update
//! pins the expected current status in its WHERE clause, so replays and
//! races collapse into no-ops instead of regressions.

use crate::models::CampaignContact;
use flowchat_common::types::{CampaignContactId, CampaignId, ContactId, TenantId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Per-status counts for a campaign
#[derive(Debug, Clone, Default)]
pub struct CampaignContactCounts {
    pub pending: i64,
    pub queued: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl CampaignContactCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.queued + self.sent + self.delivered + self.failed + self.skipped
    }

    /// Rows that will never be dispatched again
    pub fn settled(&self) -> i64 {
        self.sent + self.delivered + self.failed + self.skipped
    }
}

/// Campaign contact repository
#[derive(Clone)]
pub struct CampaignContactRepository {
    pool: PgPool,
}

impl CampaignContactRepository {
    /// Create a new campaign contact repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach contacts to a campaign; duplicates are ignored
    pub async fn add_contacts(
        &self,
        campaign_id: CampaignId,
        tenant_id: TenantId,
        contact_ids: &[ContactId],
    ) -> Result<u64, sqlx::Error> {
        let mut count = 0u64;
        let mut tx = self.pool.begin().await?;

        for contact_id in contact_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO campaign_contacts (id, campaign_id, contact_id, tenant_id)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (campaign_id, contact_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(campaign_id)
            .bind(contact_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

            count += result.rows_affected();
        }

        tx.commit().await?;
        Ok(count)
    }

    /// Get a campaign contact row by ID
    pub async fn get(
        &self,
        id: CampaignContactId,
    ) -> Result<Option<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>("SELECT * FROM campaign_contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The next pending contact, FIFO by insertion
    pub async fn next_pending(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            SELECT * FROM campaign_contacts
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// pending -> queued, when the engine hands the row to the durable lane
    pub async fn mark_queued(&self, id: CampaignContactId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'queued',
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// queued -> sent, recording the instance and gateway id of the send
    pub async fn mark_sent(
        &self,
        id: CampaignContactId,
        instance_name: &str,
        gateway_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'sent',
                last_instance_name = $2,
                last_gateway_id = $3,
                sent_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .bind(instance_name)
        .bind(gateway_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// sent -> delivered, from a gateway receipt matched by gateway id.
    /// Returns the affected row so the campaign counter can follow.
    pub async fn mark_delivered_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> Result<Option<CampaignContact>, sqlx::Error> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            UPDATE campaign_contacts SET
                status = 'delivered',
                updated_at = NOW()
            WHERE last_gateway_id = $1 AND status = 'sent'
            RETURNING *
            "#,
        )
        .bind(gateway_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Terminal failure from any live status
    pub async fn mark_failed(
        &self,
        id: CampaignContactId,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'failed',
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'queued', 'sent')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Skip a row that should never be sent (e.g. invalid phone)
    pub async fn mark_skipped(
        &self,
        id: CampaignContactId,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                status = 'skipped',
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'queued')
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bump the attempt counter on a retry
    pub async fn record_attempt(
        &self,
        id: CampaignContactId,
        error: &str,
    ) -> Result<i32, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE campaign_contacts SET
                attempts = attempts + 1,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i32, _>("attempts"))
    }

    /// Count active (pending) rows
    pub async fn count_pending(&self, campaign_id: CampaignId) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM campaign_contacts WHERE campaign_id = $1 AND status = 'pending'",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Per-status counts for stats and completion checks
    pub async fn status_counts(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignContactCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'queued') as queued,
                COUNT(*) FILTER (WHERE status = 'sent') as sent,
                COUNT(*) FILTER (WHERE status = 'delivered') as delivered,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) FILTER (WHERE status = 'skipped') as skipped
            FROM campaign_contacts
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CampaignContactCounts {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            queued: row.get::<Option<i64>, _>("queued").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            delivered: row.get::<Option<i64>, _>("delivered").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            skipped: row.get::<Option<i64>, _>("skipped").unwrap_or(0),
        })
    }
}
