//! Entitlement repository — the product grant graph

use crate::models::{Product, TenantProduct};
use flowchat_common::types::{ProductId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

/// A tenant's resolved limit for one metric
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricLimit {
    pub metric: String,
    pub limit_value: i64,
}

/// Entitlement repository
#[derive(Clone)]
pub struct EntitlementRepository {
    pool: PgPool,
}

impl EntitlementRepository {
    /// Create a new entitlement repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolved limits for every metric granted to a tenant. A grant-level
    /// override beats the product default.
    pub async fn limits_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<MetricLimit>, sqlx::Error> {
        sqlx::query_as::<_, MetricLimit>(
            r#"
            SELECT p.metric, COALESCE(tp.limit_override, p.limit_value) AS limit_value
            FROM tenant_products tp
            JOIN products p ON p.id = tp.product_id
            WHERE tp.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
    }

    /// The resolved limit for one metric, if granted
    pub async fn limit_for_metric(
        &self,
        tenant_id: TenantId,
        metric: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT COALESCE(tp.limit_override, p.limit_value)
            FROM tenant_products tp
            JOIN products p ON p.id = tp.product_id
            WHERE tp.tenant_id = $1 AND p.metric = $2
            "#,
        )
        .bind(tenant_id)
        .bind(metric)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Create a product
    pub async fn create_product(
        &self,
        name: &str,
        metric: &str,
        limit_value: i64,
    ) -> Result<Product, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (id, name, metric, limit_value)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(metric)
        .bind(limit_value)
        .fetch_one(&self.pool)
        .await
    }

    /// Grant a product to a tenant, optionally overriding the limit
    pub async fn grant(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        limit_override: Option<i64>,
    ) -> Result<TenantProduct, sqlx::Error> {
        sqlx::query_as::<_, TenantProduct>(
            r#"
            INSERT INTO tenant_products (id, tenant_id, product_id, limit_override)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, product_id)
            DO UPDATE SET limit_override = EXCLUDED.limit_override
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(product_id)
        .bind(limit_override)
        .fetch_one(&self.pool)
        .await
    }
}
