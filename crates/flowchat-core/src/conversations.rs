//! Conversation service
//!
//! Owns the conversation status edges (`pending -> open -> closed -> open`)
//! and the append path used by the ingestor and the operator send path.
//! A contact-side read advances the message state; an operator read only
//! writes a per-user marker.

use flowchat_common::types::{
    ConversationId, ConversationStatus, ConversationType, DepartmentId, InstanceId, TenantId,
    UserId,
};
use flowchat_storage::models::{Conversation, CreateConversation};
use flowchat_storage::repository::{ConversationRepository, MessageRepository};
use tracing::info;

/// Outcome of resolving a conversation for an inbound message
#[derive(Debug, Clone)]
pub struct ResolvedConversation {
    pub conversation: Conversation,
    /// True when this inbound created the conversation
    pub created: bool,
    /// True when this inbound reopened a closed conversation
    pub reopened: bool,
}

/// Conversation service
#[derive(Clone)]
pub struct ConversationService {
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl ConversationService {
    /// Create a new conversation service
    pub fn new(conversations: ConversationRepository, messages: MessageRepository) -> Self {
        Self {
            conversations,
            messages,
        }
    }

    /// Repository access for read paths
    pub fn conversations(&self) -> &ConversationRepository {
        &self.conversations
    }

    /// Repository access for read paths
    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    /// Find or create the conversation for an inbound message. A routed
    /// department opens the conversation immediately; otherwise it starts
    /// pending. New inbound on a closed conversation reopens it.
    pub async fn resolve_inbound(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
        contact_phone: &str,
        group_id: Option<&str>,
        department_id: Option<DepartmentId>,
    ) -> Result<ResolvedConversation, sqlx::Error> {
        if let Some(existing) = self
            .conversations
            .find_by_identity(tenant_id, instance_id, contact_phone, group_id)
            .await?
        {
            let mut conversation = existing;
            let mut reopened = false;

            if conversation.status_enum() == Some(ConversationStatus::Closed) {
                if let Some(updated) = self
                    .conversations
                    .transition_status(
                        tenant_id,
                        conversation.id,
                        ConversationStatus::Closed,
                        ConversationStatus::Open,
                    )
                    .await?
                {
                    conversation = updated;
                    reopened = true;
                    info!(conversation_id = %conversation.id, "Conversation reopened by inbound");
                }
            }

            self.conversations.touch_activity(conversation.id).await?;
            return Ok(ResolvedConversation {
                conversation,
                created: false,
                reopened,
            });
        }

        let conversation_type = if group_id.is_some() {
            ConversationType::Group
        } else {
            ConversationType::Individual
        };
        let status = if department_id.is_some() {
            ConversationStatus::Open
        } else {
            ConversationStatus::Pending
        };

        let conversation = self
            .conversations
            .upsert(CreateConversation {
                tenant_id,
                instance_id,
                contact_phone: contact_phone.to_string(),
                group_id: group_id.map(|s| s.to_string()),
                conversation_type,
                status,
                department_id,
            })
            .await?;

        info!(
            conversation_id = %conversation.id,
            %tenant_id,
            status = %conversation.status,
            "Conversation created"
        );

        Ok(ResolvedConversation {
            conversation,
            created: true,
            reopened: false,
        })
    }

    /// Operator pickup: `pending -> open`
    pub async fn open(
        &self,
        tenant_id: TenantId,
        id: ConversationId,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        self.conversations
            .transition_status(tenant_id, id, ConversationStatus::Pending, ConversationStatus::Open)
            .await
    }

    /// Manual close: `open -> closed`
    pub async fn close(
        &self,
        tenant_id: TenantId,
        id: ConversationId,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        self.conversations
            .transition_status(tenant_id, id, ConversationStatus::Open, ConversationStatus::Closed)
            .await
    }

    /// Record an operator read marker for every listed message. This never
    /// touches the contact-facing message state.
    pub async fn mark_read_by_operator(
        &self,
        message_ids: &[flowchat_common::types::MessageId],
        user_id: UserId,
    ) -> Result<(), sqlx::Error> {
        for message_id in message_ids {
            self.messages.mark_read_by_user(*message_id, user_id).await?;
        }
        Ok(())
    }
}
