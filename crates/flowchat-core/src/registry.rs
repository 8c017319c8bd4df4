//! Instance registry and health tracker
//!
//! The registry is the only writer of instance health and daily counters.
//! Every mutation runs inside a row-locked transaction (`FOR UPDATE`), and
//! the first operation of a tenant-local day resets the counters before
//! anything else reads them.
//!
//! Health arithmetic: +1 on success (capped at 100), -5 on a transient
//! failure, -20 on a permanent failure (floored at 0). Five consecutive
//! errors or a non-open connection make an instance ineligible. The daily
//! reset floors a bruised instance back to 80 so yesterday's bad run does
//! not bench it forever.

use flowchat_common::types::{ConnectionState, InstanceId, TenantId};
use flowchat_storage::db::DatabasePool;
use flowchat_storage::models::GatewayInstance;
use sqlx::PgPool;
use tracing::{debug, info};

/// Failure classification for health accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Health score after a successful send
pub(crate) fn health_after_success(score: i32) -> i32 {
    (score + 1).min(100)
}

/// Health score after a failed send
pub(crate) fn health_after_failure(score: i32, kind: FailureKind) -> i32 {
    let penalty = match kind {
        FailureKind::Transient => 5,
        FailureKind::Permanent => 20,
    };
    (score - penalty).max(0)
}

/// Instance registry
#[derive(Clone)]
pub struct InstanceRegistry {
    pool: PgPool,
}

impl InstanceRegistry {
    /// Create a new instance registry
    pub fn new(db_pool: &DatabasePool) -> Self {
        Self {
            pool: db_pool.pool().clone(),
        }
    }

    /// Reset daily counters for instances whose tenant-local day has rolled
    /// over. Runs first inside every registry operation.
    async fn reset_due_for_tenant(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tenant_id: TenantId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE gateway_instances gi SET
                msgs_sent_today = 0,
                msgs_delivered_today = 0,
                msgs_read_today = 0,
                msgs_failed_today = 0,
                consecutive_errors = 0,
                health_score = GREATEST(health_score, 80),
                health_last_reset = (NOW() + make_interval(mins => t.utc_offset_minutes))::date,
                updated_at = NOW()
            FROM tenants t
            WHERE t.id = gi.tenant_id
              AND gi.tenant_id = $1
              AND gi.health_last_reset < (NOW() + make_interval(mins => t.utc_offset_minutes))::date
            "#,
        )
        .bind(tenant_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() > 0 {
            info!(
                %tenant_id,
                instances = result.rows_affected(),
                "Daily instance counters reset"
            );
        }
        Ok(result.rows_affected())
    }

    /// Record an acknowledged send: health +1, counters up, error streak
    /// cleared. The sent counter never exceeds the daily limit.
    pub async fn record_success(&self, instance_id: InstanceId) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let instance = sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances WHERE id = $1 FOR UPDATE",
        )
        .bind(instance_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::reset_due_for_tenant(&mut tx, instance.tenant_id).await?;

        sqlx::query(
            r#"
            UPDATE gateway_instances SET
                health_score = LEAST(health_score + 1, 100),
                consecutive_errors = 0,
                msgs_sent_today = LEAST(msgs_sent_today + 1, daily_limit),
                last_success_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Record a failed send: health down, error streak and failed counter up
    pub async fn record_failure(
        &self,
        instance_id: InstanceId,
        kind: FailureKind,
    ) -> Result<(), sqlx::Error> {
        let penalty = match kind {
            FailureKind::Transient => 5,
            FailureKind::Permanent => 20,
        };

        let mut tx = self.pool.begin().await?;

        let instance = sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances WHERE id = $1 FOR UPDATE",
        )
        .bind(instance_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::reset_due_for_tenant(&mut tx, instance.tenant_id).await?;

        sqlx::query(
            r#"
            UPDATE gateway_instances SET
                health_score = GREATEST(health_score - $2, 0),
                consecutive_errors = consecutive_errors + 1,
                msgs_failed_today = msgs_failed_today + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .bind(penalty)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Record a delivery receipt observed on the inbound path
    pub async fn record_delivered(&self, instance_id: InstanceId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE gateway_instances SET
                msgs_delivered_today = msgs_delivered_today + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a read receipt observed on the inbound path
    pub async fn record_read(&self, instance_id: InstanceId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE gateway_instances SET
                msgs_read_today = msgs_read_today + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a connection-state change reported by the gateway
    pub async fn apply_connection_state(
        &self,
        instance_id: InstanceId,
        state: ConnectionState,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE gateway_instances SET
                connection_state = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .bind(state.to_string())
        .execute(&self.pool)
        .await?;

        debug!(%instance_id, %state, "Instance connection state updated");
        Ok(())
    }

    /// Select the best eligible instance among a tenant's assigned set.
    ///
    /// Policy: highest health first; ties broken by the lowest sent-today
    /// counter; further ties by least recently used (never-used first).
    pub async fn select_instance(
        &self,
        tenant_id: TenantId,
        assigned: &[InstanceId],
    ) -> Result<Option<GatewayInstance>, sqlx::Error> {
        if assigned.is_empty() {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;
        Self::reset_due_for_tenant(&mut tx, tenant_id).await?;

        let instance = sqlx::query_as::<_, GatewayInstance>(
            r#"
            SELECT * FROM gateway_instances
            WHERE tenant_id = $1
              AND id = ANY($2)
              AND connection_state = 'open'
              AND consecutive_errors < 5
              AND msgs_sent_today < daily_limit
            ORDER BY health_score DESC, msgs_sent_today ASC, last_success_at ASC NULLS FIRST
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(assigned)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(instance)
    }

    /// Fetch one instance, applying any due daily reset first
    pub async fn get_fresh(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<GatewayInstance>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(instance) = sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances WHERE id = $1 FOR UPDATE",
        )
        .bind(instance_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.commit().await?;
            return Ok(None);
        };

        Self::reset_due_for_tenant(&mut tx, instance.tenant_id).await?;

        let refreshed = sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances WHERE id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_success_caps_at_100() {
        assert_eq!(health_after_success(90), 91);
        assert_eq!(health_after_success(100), 100);
    }

    #[test]
    fn test_health_failure_floors_at_zero() {
        assert_eq!(health_after_failure(90, FailureKind::Transient), 85);
        assert_eq!(health_after_failure(90, FailureKind::Permanent), 70);
        assert_eq!(health_after_failure(3, FailureKind::Transient), 0);
        assert_eq!(health_after_failure(10, FailureKind::Permanent), 0);
    }

    #[test]
    fn test_transient_streak_erodes_but_does_not_zero_health() {
        // after five consecutive transient failures the instance drops out
        // on the error streak (>= 5), while the score only erodes to 65
        let mut score = 90;
        for _ in 0..5 {
            score = health_after_failure(score, FailureKind::Transient);
        }
        assert_eq!(score, 65);
    }
}
