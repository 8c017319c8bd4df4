//! Message attachment repository

use crate::models::{CreateAttachment, MessageAttachment};
use chrono::{DateTime, Duration, Utc};
use flowchat_common::types::AttachmentId;
use sqlx::PgPool;
use uuid::Uuid;

/// Message attachment repository
#[derive(Clone)]
pub struct AttachmentRepository {
    pool: PgPool,
}

impl AttachmentRepository {
    /// Create a new attachment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an attachment referencing the gateway's URL
    pub async fn create(&self, input: CreateAttachment) -> Result<MessageAttachment, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, MessageAttachment>(
            r#"
            INSERT INTO message_attachments
                (id, message_id, tenant_id, kind, remote_url, mime_type, size_bytes, duration_secs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.message_id)
        .bind(input.tenant_id)
        .bind(input.kind.to_string())
        .bind(&input.remote_url)
        .bind(&input.mime_type)
        .bind(input.size_bytes)
        .bind(input.duration_secs)
        .fetch_one(&self.pool)
        .await
    }

    /// Get an attachment by ID
    pub async fn get(&self, id: AttachmentId) -> Result<Option<MessageAttachment>, sqlx::Error> {
        sqlx::query_as::<_, MessageAttachment>(
            "SELECT * FROM message_attachments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Record the local cache location; the file stays valid for the cache
    /// TTL and is then swept.
    pub async fn set_local_path(
        &self,
        id: AttachmentId,
        local_path: &str,
        ttl_days: i64,
    ) -> Result<(), sqlx::Error> {
        let expires_at = Utc::now() + Duration::days(ttl_days);
        sqlx::query(
            r#"
            UPDATE message_attachments SET
                local_path = $2,
                expires_at = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(local_path)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the permanent object-store URL after upload
    pub async fn set_storage_url(
        &self,
        id: AttachmentId,
        storage_url: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE message_attachments SET
                storage_url = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(storage_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attachments whose local cache has expired
    pub async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MessageAttachment>, sqlx::Error> {
        sqlx::query_as::<_, MessageAttachment>(
            r#"
            SELECT * FROM message_attachments
            WHERE local_path IS NOT NULL AND expires_at IS NOT NULL AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Forget the local cache location after the file is removed
    pub async fn clear_local_path(&self, id: AttachmentId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE message_attachments SET
                local_path = NULL,
                expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
