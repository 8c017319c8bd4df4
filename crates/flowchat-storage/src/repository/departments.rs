//! Department repository

use crate::models::Department;
use flowchat_common::types::{DepartmentId, TenantId};
use sqlx::PgPool;

/// Department repository
#[derive(Clone)]
pub struct DepartmentRepository {
    pool: PgPool,
}

impl DepartmentRepository {
    /// Create a new department repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a department by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: DepartmentId,
    ) -> Result<Option<Department>, sqlx::Error> {
        sqlx::query_as::<_, Department>(
            "SELECT * FROM departments WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List departments in deterministic routing order
    pub async fn list_in_routing_order(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<Department>, sqlx::Error> {
        sqlx::query_as::<_, Department>(
            r#"
            SELECT * FROM departments
            WHERE tenant_id = $1
            ORDER BY sort_order ASC, created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
    }

    /// The designated default department, if any
    pub async fn find_default(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<Department>, sqlx::Error> {
        sqlx::query_as::<_, Department>(
            r#"
            SELECT * FROM departments
            WHERE tenant_id = $1 AND is_default
            ORDER BY sort_order ASC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }
}
