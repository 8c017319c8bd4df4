//! Gateway instance repository
//!
//! CRUD only. Health and daily counters are owned by the instance registry,
//! which mutates them under row-level locks.

use crate::models::{CreateInstance, GatewayInstance};
use flowchat_common::types::{ConnectionState, InstanceId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

/// Gateway instance repository
#[derive(Clone)]
pub struct InstanceRepository {
    pool: PgPool,
}

impl InstanceRepository {
    /// Create a new instance repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new gateway instance
    pub async fn create(&self, input: CreateInstance) -> Result<GatewayInstance, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, GatewayInstance>(
            r#"
            INSERT INTO gateway_instances (id, tenant_id, name, external_id, api_key, daily_limit)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.external_id)
        .bind(&input.api_key)
        .bind(input.daily_limit.unwrap_or(1000))
        .fetch_one(&self.pool)
        .await
    }

    /// Get an instance by ID (worker side; the tenant comes out of the row)
    pub async fn get(&self, id: InstanceId) -> Result<Option<GatewayInstance>, sqlx::Error> {
        sqlx::query_as::<_, GatewayInstance>("SELECT * FROM gateway_instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get an instance by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: InstanceId,
    ) -> Result<Option<GatewayInstance>, sqlx::Error> {
        sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolve an instance by the external gateway identifier. Used by the
    /// ingestor; the tenant comes out of the row, not in.
    pub async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<GatewayInstance>, sqlx::Error> {
        sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List every instance (socket supervisor)
    pub async fn list_all(&self) -> Result<Vec<GatewayInstance>, sqlx::Error> {
        sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// List instances for a tenant
    pub async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<GatewayInstance>, sqlx::Error> {
        sqlx::query_as::<_, GatewayInstance>(
            "SELECT * FROM gateway_instances WHERE tenant_id = $1 ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Count instances for a tenant (entitlement metric)
    pub async fn count_by_tenant(&self, tenant_id: TenantId) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM gateway_instances WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    /// Update the connection state reported by the gateway
    pub async fn set_connection_state(
        &self,
        id: InstanceId,
        state: ConnectionState,
    ) -> Result<Option<GatewayInstance>, sqlx::Error> {
        sqlx::query_as::<_, GatewayInstance>(
            r#"
            UPDATE gateway_instances SET
                connection_state = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(state.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete an instance
    pub async fn delete(&self, tenant_id: TenantId, id: InstanceId) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM gateway_instances WHERE id = $1 AND tenant_id = $2")
                .bind(id)
                .bind(tenant_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
