//! Tenant repository

use crate::db::DatabasePool;
use crate::models::{CreateTenant, Tenant};
use async_trait::async_trait;
use flowchat_common::types::TenantId;
use flowchat_common::{Error, Result};
use uuid::Uuid;

/// Tenant repository trait
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create(&self, input: CreateTenant) -> Result<Tenant>;
    async fn get(&self, id: TenantId) -> Result<Option<Tenant>>;
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Tenant>>;
    async fn suspend(&self, id: TenantId) -> Result<()>;
    async fn reactivate(&self, id: TenantId) -> Result<()>;
    async fn soft_delete(&self, id: TenantId) -> Result<()>;
}

/// Database tenant repository
pub struct DbTenantRepository {
    pool: DatabasePool,
}

impl DbTenantRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepository for DbTenantRepository {
    async fn create(&self, input: CreateTenant) -> Result<Tenant> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();
        let settings = input.settings.unwrap_or(serde_json::json!({}));
        let plan = input.plan.unwrap_or_else(|| "free".to_string());

        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, slug, status, plan, utc_offset_minutes, settings, created_at, updated_at)
            VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.slug)
        .bind(&plan)
        .bind(input.utc_offset_minutes.unwrap_or(0))
        .bind(&settings)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create tenant".to_string()))
    }

    async fn get(&self, id: TenantId) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1 AND status != 'deleted'")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE slug = $1 AND status != 'deleted'",
        )
        .bind(slug)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Tenant>> {
        sqlx::query_as::<_, Tenant>(
            r#"
            SELECT * FROM tenants
            WHERE status != 'deleted'
            ORDER BY created_at ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn suspend(&self, id: TenantId) -> Result<()> {
        sqlx::query(
            "UPDATE tenants SET status = 'suspended', updated_at = NOW() WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn reactivate(&self, id: TenantId) -> Result<()> {
        sqlx::query(
            "UPDATE tenants SET status = 'active', updated_at = NOW() WHERE id = $1 AND status = 'suspended'",
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Tenants are never hard-deleted while they have dependents; this only
    /// flips the status so the row disappears from reads.
    async fn soft_delete(&self, id: TenantId) -> Result<()> {
        sqlx::query("UPDATE tenants SET status = 'deleted', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
