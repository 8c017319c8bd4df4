//! Campaign log repository — append-only audit trail

use crate::models::{CampaignLog, CreateCampaignLog};
use flowchat_common::types::{CampaignId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

/// Campaign log repository
#[derive(Clone)]
pub struct CampaignLogRepository {
    pool: PgPool,
}

impl CampaignLogRepository {
    /// Create a new campaign log repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a log entry
    pub async fn append(&self, input: CreateCampaignLog) -> Result<CampaignLog, sqlx::Error> {
        sqlx::query_as::<_, CampaignLog>(
            r#"
            INSERT INTO campaign_logs
                (id, campaign_id, tenant_id, log_type, severity, message, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.campaign_id)
        .bind(input.tenant_id)
        .bind(&input.log_type)
        .bind(&input.severity)
        .bind(&input.message)
        .bind(&input.details)
        .fetch_one(&self.pool)
        .await
    }

    /// List log entries for a campaign, newest first
    pub async fn list_by_campaign(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignLog>, sqlx::Error> {
        sqlx::query_as::<_, CampaignLog>(
            r#"
            SELECT * FROM campaign_logs
            WHERE campaign_id = $1 AND tenant_id = $2
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(campaign_id)
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }
}
