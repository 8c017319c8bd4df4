//! Contact repository

use crate::models::{Contact, CreateContact};
use flowchat_common::types::{ContactId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

/// Contact repository
#[derive(Clone)]
pub struct ContactRepository {
    pool: PgPool,
}

impl ContactRepository {
    /// Create a new contact repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a contact by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: ContactId,
    ) -> Result<Option<Contact>, sqlx::Error> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Insert a contact, or refresh name/state on conflict. The phone is the
    /// identity within a tenant.
    pub async fn upsert(&self, input: CreateContact) -> Result<Contact, sqlx::Error> {
        let id = Uuid::new_v4();
        let tags = input.tags.unwrap_or_else(|| serde_json::json!([]));
        let custom_vars = input.custom_vars.unwrap_or_else(|| serde_json::json!({}));

        sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, tenant_id, phone, name, state_code, tags, custom_vars)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, phone)
            DO UPDATE SET
                name = COALESCE(EXCLUDED.name, contacts.name),
                state_code = COALESCE(EXCLUDED.state_code, contacts.state_code),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.phone)
        .bind(&input.name)
        .bind(&input.state_code)
        .bind(&tags)
        .bind(&custom_vars)
        .fetch_one(&self.pool)
        .await
    }
}
