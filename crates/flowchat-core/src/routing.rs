//! Routing and department policy
//!
//! A new inbound conversation with no department is routed by scanning the
//! first incoming message body against each department's keywords,
//! case-insensitive and whole-word, in deterministic department order.
//! First match wins; the designated default department catches the rest.

use flowchat_common::types::{ConversationId, DepartmentId, MessageDirection, MessageState, TenantId};
use flowchat_storage::models::{CreateMessage, Department};
use flowchat_storage::repository::{ConversationRepository, DepartmentRepository, MessageRepository};
use regex::Regex;
use tracing::{debug, info};

/// Whether `body` contains `keyword` as a whole word, ignoring case
pub(crate) fn matches_keyword(body: &str, keyword: &str) -> bool {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(body),
        Err(_) => false,
    }
}

/// Pick the owning department for a message body, scanning departments in
/// the given order. Returns the first department with a matching keyword,
/// else the default department, else None.
pub(crate) fn pick_department(departments: &[Department], body: &str) -> Option<DepartmentId> {
    for dept in departments {
        for keyword in dept.keywords_vec() {
            if matches_keyword(body, &keyword) {
                return Some(dept.id);
            }
        }
    }
    departments.iter().find(|d| d.is_default).map(|d| d.id)
}

/// Department router
#[derive(Clone)]
pub struct Router {
    departments: DepartmentRepository,
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl Router {
    /// Create a new router
    pub fn new(
        departments: DepartmentRepository,
        conversations: ConversationRepository,
        messages: MessageRepository,
    ) -> Self {
        Self {
            departments,
            conversations,
            messages,
        }
    }

    /// Resolve the department for a first inbound message, if any
    pub async fn route(
        &self,
        tenant_id: TenantId,
        body: &str,
    ) -> Result<Option<DepartmentId>, sqlx::Error> {
        let departments = self.departments.list_in_routing_order(tenant_id).await?;
        let picked = pick_department(&departments, body);

        debug!(
            %tenant_id,
            department = ?picked,
            "Routed inbound message"
        );
        Ok(picked)
    }

    /// Manual transfer: rewrite the conversation's department and drop the
    /// department's transfer message into the thread as a system message.
    pub async fn transfer(
        &self,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        department_id: DepartmentId,
    ) -> Result<bool, sqlx::Error> {
        let Some(department) = self.departments.get_by_tenant(tenant_id, department_id).await?
        else {
            return Ok(false);
        };

        let updated = self
            .conversations
            .set_department(tenant_id, conversation_id, Some(department_id))
            .await?;
        if updated.is_none() {
            return Ok(false);
        }

        if let Some(transfer_message) = &department.transfer_message {
            self.messages
                .append(CreateMessage {
                    conversation_id,
                    tenant_id,
                    direction: MessageDirection::Outgoing,
                    content: Some(transfer_message.clone()),
                    sender_name: Some("system".to_string()),
                    sender_phone: None,
                    reply_to_id: None,
                    state: MessageState::Queued,
                    external_id: None,
                    gateway_timestamp: None,
                })
                .await?;
        }

        info!(
            %tenant_id,
            %conversation_id,
            department = %department.name,
            "Conversation transferred"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn dept(name: &str, keywords: &[&str], is_default: bool, sort_order: i32) -> Department {
        Department {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: name.to_string(),
            color: None,
            transfer_message: None,
            routing_keywords: serde_json::json!(keywords),
            is_default,
            sort_order,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_whole_word_match() {
        assert!(matches_keyword("my device is broken", "broken"));
        assert!(matches_keyword("BROKEN screen", "broken"));
        assert!(!matches_keyword("heartbroken", "broken"));
        assert!(!matches_keyword("brokenhearted", "broken"));
    }

    #[test]
    fn test_keyword_with_regex_metachars() {
        assert!(matches_keyword("price (today)", "price"));
        // keyword itself contains metacharacters and must be escaped
        assert!(matches_keyword("plan a+", "a+"));
    }

    #[test]
    fn test_first_matching_department_wins() {
        let sales = dept("Sales", &["price", "buy"], false, 0);
        let support = dept("Support", &["help", "broken"], false, 1);
        let departments = vec![sales.clone(), support.clone()];

        assert_eq!(
            pick_department(&departments, "my device is broken"),
            Some(support.id)
        );
        assert_eq!(
            pick_department(&departments, "what is the price to buy"),
            Some(sales.id)
        );
    }

    #[test]
    fn test_no_match_without_default_leaves_unrouted() {
        let sales = dept("Sales", &["price", "buy"], false, 0);
        let support = dept("Support", &["help", "broken"], false, 1);
        assert_eq!(pick_department(&[sales, support], "hello"), None);
    }

    #[test]
    fn test_no_match_falls_back_to_default() {
        let sales = dept("Sales", &["price"], false, 0);
        let general = dept("General", &[], true, 1);
        assert_eq!(
            pick_department(&[sales, general.clone()], "hello"),
            Some(general.id)
        );
    }
}
