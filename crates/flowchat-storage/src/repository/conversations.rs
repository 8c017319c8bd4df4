//! Conversation repository

use crate::models::{Conversation, CreateConversation};
use chrono::{DateTime, Utc};
use flowchat_common::types::{ConversationId, ConversationStatus, DepartmentId, InstanceId, TenantId};
use sqlx::PgPool;
use uuid::Uuid;

/// Filters for listing conversations
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub department_id: Option<DepartmentId>,
    /// Only conversations updated after this instant (reconnect reconcile)
    pub since: Option<DateTime<Utc>>,
}

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    /// Create a new conversation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a conversation by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: ConversationId,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find the conversation identified by (tenant, instance, phone, group)
    pub async fn find_by_identity(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
        contact_phone: &str,
        group_id: Option<&str>,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE tenant_id = $1 AND instance_id = $2 AND contact_phone = $3
              AND COALESCE(group_id, '') = COALESCE($4, '')
            "#,
        )
        .bind(tenant_id)
        .bind(instance_id)
        .bind(contact_phone)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Insert a conversation, returning the existing row when the identity
    /// already exists (concurrent ingest of the same contact).
    pub async fn upsert(&self, input: CreateConversation) -> Result<Conversation, sqlx::Error> {
        let id = Uuid::new_v4();

        if let Some(inserted) = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations
                (id, tenant_id, instance_id, contact_phone, group_id, conversation_type, status, department_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, instance_id, contact_phone, COALESCE(group_id, ''))
            DO NOTHING
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(input.instance_id)
        .bind(&input.contact_phone)
        .bind(&input.group_id)
        .bind(input.conversation_type.to_string())
        .bind(input.status.to_string())
        .bind(input.department_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(inserted);
        }

        // Lost the insert race; the row exists.
        self.find_by_identity(
            input.tenant_id,
            input.instance_id,
            &input.contact_phone,
            input.group_id.as_deref(),
        )
        .await?
        .ok_or(sqlx::Error::RowNotFound)
    }

    /// List conversations for a tenant, newest activity first
    pub async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        filter: &ConversationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE tenant_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::UUID IS NULL OR department_id = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR updated_at > $4)
            ORDER BY last_activity_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.department_id)
        .bind(filter.since)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// Count conversations matching a filter
    pub async fn count_by_tenant(
        &self,
        tenant_id: TenantId,
        filter: &ConversationFilter,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM conversations
            WHERE tenant_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::UUID IS NULL OR department_id = $3)
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.department_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Transition conversation status. The WHERE clause pins the expected
    /// current status so invalid edges never commit.
    pub async fn transition_status(
        &self,
        tenant_id: TenantId,
        id: ConversationId,
        from: ConversationStatus,
        to: ConversationStatus,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        if !from.can_transition_to(to) {
            return Ok(None);
        }

        sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET
                status = $4,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Assign or change the owning department
    pub async fn set_department(
        &self,
        tenant_id: TenantId,
        id: ConversationId,
        department_id: Option<DepartmentId>,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET
                department_id = $3,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(department_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Bump last activity
    pub async fn touch_activity(&self, id: ConversationId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE conversations SET last_activity_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merge group metadata reported by the gateway
    pub async fn merge_group_metadata(
        &self,
        id: ConversationId,
        metadata: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE conversations SET
                group_metadata = group_metadata || $2,
                last_activity_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
