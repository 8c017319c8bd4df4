//! Message repository
//!
//! Message inserts take a per-conversation advisory lock so the
//! server-assigned sequence is written by a single writer at a time. The
//! lock spans only the insert transaction, never a network call.

use crate::models::{CreateMessage, Message, Reaction};
use flowchat_common::types::{
    ConversationId, InstanceId, MessageId, MessageState, TenantId, UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Message repository
#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    /// Create a new message repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append a message to a conversation under the conversation's advisory
    /// lock.
    pub async fn append(&self, input: CreateMessage) -> Result<Message, sqlx::Error> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::TEXT))")
            .bind(input.conversation_id.to_string())
            .execute(&mut *tx)
            .await?;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages
                (id, conversation_id, tenant_id, direction, content, sender_name, sender_phone,
                 reply_to_id, state, external_id, gateway_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.conversation_id)
        .bind(input.tenant_id)
        .bind(input.direction.to_string())
        .bind(&input.content)
        .bind(&input.sender_name)
        .bind(&input.sender_phone)
        .bind(input.reply_to_id)
        .bind(input.state.to_string())
        .bind(&input.external_id)
        .bind(input.gateway_timestamp)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    /// Get a message by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: MessageId,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Resolve a message by its gateway id on a given instance. This is the
    /// idempotency lookup for delivery receipts and late acks.
    pub async fn find_by_external_id(
        &self,
        instance_id: InstanceId,
        external_id: &str,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT m.* FROM messages m
            JOIN conversations c ON c.id = m.conversation_id
            WHERE c.instance_id = $1 AND m.external_id = $2
            ORDER BY m.seq DESC
            LIMIT 1
            "#,
        )
        .bind(instance_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List messages in a conversation ordered by server sequence, optionally
    /// resuming after a known cursor.
    pub async fn list_by_conversation(
        &self,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        since_seq: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE tenant_id = $1 AND conversation_id = $2
              AND ($3::BIGINT IS NULL OR seq > $3)
            ORDER BY seq ASC
            LIMIT $4
            "#,
        )
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(since_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Advance delivery state monotonically. The guarded CASE means a late
    /// `delivered` after `read` is a no-op rather than a regression, and the
    /// sink states never move.
    pub async fn advance_state(
        &self,
        id: MessageId,
        next: MessageState,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                state = $2,
                updated_at = NOW()
            WHERE id = $1
              AND state NOT IN ('failed', 'deleted')
              AND CASE state
                    WHEN 'queued' THEN $2 IN ('sent', 'delivered', 'read', 'failed', 'deleted')
                    WHEN 'sent' THEN $2 IN ('delivered', 'read', 'failed', 'deleted')
                    WHEN 'delivered' THEN $2 IN ('read', 'failed', 'deleted')
                    WHEN 'read' THEN $2 IN ('failed', 'deleted')
                    ELSE FALSE
                  END
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Contact-side deletion: the row survives for audit, the visible content
    /// is blanked.
    pub async fn mark_deleted(&self, id: MessageId) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                is_deleted = TRUE,
                content = NULL,
                state = 'deleted',
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Record an operator read marker. Operator reads never advance the
    /// contact-facing message state.
    pub async fn mark_read_by_user(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add a reaction; duplicates on (message, user, emoji) are dropped
    pub async fn add_reaction(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
        user_id: Option<UserId>,
        contact_phone: Option<&str>,
        emoji: &str,
    ) -> Result<Option<Reaction>, sqlx::Error> {
        sqlx::query_as::<_, Reaction>(
            r#"
            INSERT INTO reactions (id, message_id, tenant_id, user_id, contact_phone, emoji)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (message_id, user_id, emoji) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message_id)
        .bind(tenant_id)
        .bind(user_id)
        .bind(contact_phone)
        .bind(emoji)
        .fetch_optional(&self.pool)
        .await
    }
}
