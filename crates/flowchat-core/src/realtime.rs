//! Realtime fan-out hub
//!
//! One persistent connection per operator session; each connection
//! multiplexes per-conversation subscriptions plus the implicit tenant
//! channel. Delivery is best-effort: a slow client's full buffer drops the
//! event, and the client reconciles on reconnect with the REST `since`
//! cursors.

use chrono::Utc;
use flowchat_common::types::{ConversationId, TenantId, UserId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffered frames per connection before events are dropped
const CONNECTION_BUFFER: usize = 256;

/// Connection identifier
pub type ConnectionId = Uuid;

/// Events pushed to operator clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeEvent {
    #[serde(rename = "message.new")]
    MessageNew(serde_json::Value),
    #[serde(rename = "message.updated")]
    MessageUpdated(serde_json::Value),
    #[serde(rename = "conversation.new")]
    ConversationNew(serde_json::Value),
    #[serde(rename = "conversation.updated")]
    ConversationUpdated(serde_json::Value),
    #[serde(rename = "instance.state_changed")]
    InstanceStateChanged(serde_json::Value),
}

/// The wire frame: `{type, payload, ts}`
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    #[serde(flatten)]
    pub event: RealtimeEvent,
    pub ts: chrono::DateTime<Utc>,
}

impl ServerFrame {
    fn new(event: RealtimeEvent) -> Self {
        Self {
            event,
            ts: Utc::now(),
        }
    }
}

struct Connection {
    tenant_id: TenantId,
    #[allow(dead_code)]
    user_id: UserId,
    sender: mpsc::Sender<ServerFrame>,
    subscriptions: HashSet<ConversationId>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    by_tenant: HashMap<TenantId, HashSet<ConnectionId>>,
    by_conversation: HashMap<ConversationId, HashSet<ConnectionId>>,
}

/// Realtime hub
#[derive(Clone, Default)]
pub struct RealtimeHub {
    state: Arc<RwLock<HubState>>,
}

impl RealtimeHub {
    /// Create a new hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for an authenticated operator session.
    /// Returns the connection id and the frame receiver to drain into the
    /// socket.
    pub async fn register(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let conn_id = Uuid::new_v4();

        let mut state = self.state.write().await;
        state.connections.insert(
            conn_id,
            Connection {
                tenant_id,
                user_id,
                sender: tx,
                subscriptions: HashSet::new(),
            },
        );
        state.by_tenant.entry(tenant_id).or_default().insert(conn_id);

        debug!(%conn_id, %tenant_id, "Realtime connection registered");
        (conn_id, rx)
    }

    /// Drop a connection and all of its subscriptions
    pub async fn unregister(&self, conn_id: ConnectionId) {
        let mut state = self.state.write().await;
        if let Some(conn) = state.connections.remove(&conn_id) {
            if let Some(set) = state.by_tenant.get_mut(&conn.tenant_id) {
                set.remove(&conn_id);
                if set.is_empty() {
                    state.by_tenant.remove(&conn.tenant_id);
                }
            }
            for conversation_id in conn.subscriptions {
                if let Some(set) = state.by_conversation.get_mut(&conversation_id) {
                    set.remove(&conn_id);
                    if set.is_empty() {
                        state.by_conversation.remove(&conversation_id);
                    }
                }
            }
        }
        debug!(%conn_id, "Realtime connection unregistered");
    }

    /// Subscribe a connection to a conversation
    pub async fn subscribe(&self, conn_id: ConnectionId, conversation_id: ConversationId) {
        let mut state = self.state.write().await;
        if let Some(conn) = state.connections.get_mut(&conn_id) {
            conn.subscriptions.insert(conversation_id);
            state
                .by_conversation
                .entry(conversation_id)
                .or_default()
                .insert(conn_id);
        }
    }

    /// Unsubscribe a connection from a conversation
    pub async fn unsubscribe(&self, conn_id: ConnectionId, conversation_id: ConversationId) {
        let mut state = self.state.write().await;
        if let Some(conn) = state.connections.get_mut(&conn_id) {
            conn.subscriptions.remove(&conversation_id);
        }
        if let Some(set) = state.by_conversation.get_mut(&conversation_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                state.by_conversation.remove(&conversation_id);
            }
        }
    }

    /// Push an event to the subscribers of one conversation
    pub async fn publish_to_conversation(
        &self,
        conversation_id: ConversationId,
        event: RealtimeEvent,
    ) {
        let frame = ServerFrame::new(event);
        let state = self.state.read().await;

        let Some(subscribers) = state.by_conversation.get(&conversation_id) else {
            return;
        };
        for conn_id in subscribers {
            if let Some(conn) = state.connections.get(conn_id) {
                deliver(&conn.sender, &frame, conn_id);
            }
        }
    }

    /// Push an event to every connection of a tenant (the implicit channel)
    pub async fn publish_to_tenant(&self, tenant_id: TenantId, event: RealtimeEvent) {
        let frame = ServerFrame::new(event);
        let state = self.state.read().await;

        let Some(connections) = state.by_tenant.get(&tenant_id) else {
            return;
        };
        for conn_id in connections {
            if let Some(conn) = state.connections.get(conn_id) {
                deliver(&conn.sender, &frame, conn_id);
            }
        }
    }

    /// Number of live connections (diagnostics)
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

fn deliver(sender: &mpsc::Sender<ServerFrame>, frame: &ServerFrame, conn_id: &ConnectionId) {
    // best-effort: a full buffer means the client is too slow and will
    // reconcile on reconnect
    if let Err(e) = sender.try_send(frame.clone()) {
        warn!(%conn_id, error = %e, "Dropping realtime frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conversation_fanout_reaches_subscribers_only() {
        let hub = RealtimeHub::new();
        let tenant = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let (conn_a, mut rx_a) = hub.register(tenant, Uuid::new_v4()).await;
        let (_conn_b, mut rx_b) = hub.register(tenant, Uuid::new_v4()).await;

        hub.subscribe(conn_a, conversation).await;
        hub.publish_to_conversation(
            conversation,
            RealtimeEvent::MessageNew(serde_json::json!({"id": "m1"})),
        )
        .await;

        let frame = rx_a.try_recv().unwrap();
        assert!(matches!(frame.event, RealtimeEvent::MessageNew(_)));
        assert!(rx_b.try_recv().is_err(), "unsubscribed connection got frame");
    }

    #[tokio::test]
    async fn test_tenant_channel_reaches_all_tenant_connections() {
        let hub = RealtimeHub::new();
        let tenant = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();

        let (_a, mut rx_a) = hub.register(tenant, Uuid::new_v4()).await;
        let (_b, mut rx_b) = hub.register(tenant, Uuid::new_v4()).await;
        let (_c, mut rx_c) = hub.register(other_tenant, Uuid::new_v4()).await;

        hub.publish_to_tenant(
            tenant,
            RealtimeEvent::ConversationNew(serde_json::json!({"id": "c1"})),
        )
        .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err(), "cross-tenant frame leaked");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = RealtimeHub::new();
        let tenant = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let (conn, mut rx) = hub.register(tenant, Uuid::new_v4()).await;
        hub.subscribe(conn, conversation).await;
        hub.unsubscribe(conn, conversation).await;

        hub.publish_to_conversation(
            conversation,
            RealtimeEvent::MessageNew(serde_json::json!({})),
        )
        .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_cleans_up() {
        let hub = RealtimeHub::new();
        let tenant = Uuid::new_v4();
        let (conn, _rx) = hub.register(tenant, Uuid::new_v4()).await;
        assert_eq!(hub.connection_count().await, 1);

        hub.unregister(conn).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[test]
    fn test_frame_wire_shape() {
        let frame = ServerFrame::new(RealtimeEvent::MessageNew(serde_json::json!({"id": 1})));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "message.new");
        assert_eq!(value["payload"]["id"], 1);
        assert!(value["ts"].is_string());
    }
}
