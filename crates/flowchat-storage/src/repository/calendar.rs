//! Business hours and holiday repository

use crate::models::{BusinessHours, Holiday};
use chrono::NaiveDate;
use flowchat_common::types::TenantId;
use sqlx::PgPool;

/// Business hours and holiday repository
#[derive(Clone)]
pub struct CalendarRepository {
    pool: PgPool,
}

impl CalendarRepository {
    /// Create a new calendar repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enabled business-hours windows for a tenant, keyed by weekday
    pub async fn business_hours(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<BusinessHours>, sqlx::Error> {
        sqlx::query_as::<_, BusinessHours>(
            r#"
            SELECT * FROM business_hours
            WHERE tenant_id = $1 AND enabled
            ORDER BY weekday ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Holidays in a date range (boundary search for the campaign gate)
    pub async fn holidays_between(
        &self,
        tenant_id: TenantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>, sqlx::Error> {
        sqlx::query_as::<_, Holiday>(
            r#"
            SELECT * FROM holidays
            WHERE tenant_id = $1 AND day >= $2 AND day <= $3
            ORDER BY day ASC
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
    }
}
