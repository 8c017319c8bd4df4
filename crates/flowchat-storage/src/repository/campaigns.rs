//! Campaign repository

use crate::models::{Campaign, CampaignMessage, CreateCampaign, CreateCampaignMessage};
use flowchat_common::types::{CampaignId, CampaignStatus, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

/// Campaign repository
#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a campaign in draft status
    pub async fn create(&self, input: CreateCampaign) -> Result<Campaign, sqlx::Error> {
        let id = Uuid::new_v4();
        let instance_ids =
            serde_json::to_value(&input.instance_ids).unwrap_or_else(|_| serde_json::json!([]));

        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns
                (id, tenant_id, name, description, starts_at, min_delay_secs, max_delay_secs,
                 batch_size, respect_business_hours, instance_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.starts_at)
        .bind(input.min_delay_secs.unwrap_or(2))
        .bind(input.max_delay_secs.unwrap_or(8))
        .bind(input.batch_size.unwrap_or(50))
        .bind(input.respect_business_hours.unwrap_or(true))
        .bind(&instance_ids)
        .fetch_one(&self.pool)
        .await
    }

    /// Append an ordered message template to a campaign
    pub async fn add_message(
        &self,
        input: CreateCampaignMessage,
    ) -> Result<CampaignMessage, sqlx::Error> {
        sqlx::query_as::<_, CampaignMessage>(
            r#"
            INSERT INTO campaign_messages
                (id, campaign_id, tenant_id, position, kind, content, media_url, caption)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.campaign_id)
        .bind(input.tenant_id)
        .bind(input.position)
        .bind(&input.kind)
        .bind(&input.content)
        .bind(&input.media_url)
        .bind(&input.caption)
        .fetch_one(&self.pool)
        .await
    }

    /// Ordered message templates for a campaign
    pub async fn list_messages(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<CampaignMessage>, sqlx::Error> {
        sqlx::query_as::<_, CampaignMessage>(
            "SELECT * FROM campaign_messages WHERE campaign_id = $1 ORDER BY position ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Get a campaign by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get a campaign by ID (worker side; tenant comes out of the row)
    pub async fn get(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List campaigns for a tenant
    pub async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE tenant_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// Campaign ids currently in `running` status (engine resume on boot)
    pub async fn list_running_ids(&self) -> Result<Vec<CampaignId>, sqlx::Error> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM campaigns WHERE status = 'running'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Scheduled campaigns whose start time has arrived
    pub async fn list_scheduled_ready(&self) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND (starts_at IS NULL OR starts_at <= NOW())
            ORDER BY starts_at ASC NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Transition campaign status. The expected current status is pinned in
    /// the WHERE clause, so concurrent transitions lose cleanly.
    pub async fn transition_status(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
        pause_reason: Option<&str>,
    ) -> Result<Option<Campaign>, sqlx::Error> {
        if !from.can_transition_to(to) {
            return Ok(None);
        }

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $3,
                pause_reason = $4,
                started_at = CASE WHEN $3 = 'running' AND started_at IS NULL THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('completed', 'cancelled', 'failed') THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(pause_reason)
        .fetch_optional(&self.pool)
        .await
    }

    /// Set the contact total once the audience is frozen at schedule time
    pub async fn set_total_contacts(
        &self,
        id: CampaignId,
        total: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE campaigns SET total_contacts = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a successful dispatch: counters, cursor and last instance
    pub async fn record_sent(
        &self,
        id: CampaignId,
        instance_name: &str,
        instance_cursor: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                sent_count = sent_count + 1,
                last_instance_name = $2,
                instance_cursor = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(instance_name)
        .bind(instance_cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a delivery receipt for a campaign send
    pub async fn record_delivered(&self, id: CampaignId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE campaigns SET delivered_count = delivered_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a permanently failed dispatch
    pub async fn record_failed(&self, id: CampaignId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE campaigns SET failed_count = failed_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count campaigns started within the given month window (entitlement
    /// metric `campaigns_per_month`).
    pub async fn count_started_between(
        &self,
        tenant_id: TenantId,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM campaigns
            WHERE tenant_id = $1 AND started_at >= $2 AND started_at < $3
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Delete a campaign (drafts only); contact rows and logs cascade
    pub async fn delete_draft(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM campaigns WHERE id = $1 AND tenant_id = $2 AND status = 'draft'",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
