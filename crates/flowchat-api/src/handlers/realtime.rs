//! Operator realtime endpoint
//!
//! One WebSocket per authenticated operator session. The client sends
//! `{type: subscribe|unsubscribe|typing, conversation_id}` frames; the
//! server pushes `{type, payload, ts}` frames from the fan-out hub.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use flowchat_common::types::ConversationId;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{AppState, AuthContext};

/// Client-to-server frames
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { conversation_id: ConversationId },
    Unsubscribe { conversation_id: ConversationId },
    Typing { conversation_id: ConversationId },
}

/// GET /ws — upgrade to the operator realtime channel
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, auth, socket))
}

async fn handle_socket(state: Arc<AppState>, auth: AuthContext, socket: WebSocket) {
    let user_id = auth.user_id.unwrap_or_else(Uuid::new_v4);
    let (conn_id, mut frames) = state.hub.register(auth.tenant_id, user_id).await;
    let (mut sink, mut stream) = socket.split();

    debug!(%conn_id, tenant_id = %auth.tenant_id, "Operator socket connected");

    loop {
        tokio::select! {
            // hub -> client
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                state.metrics.realtime_frames.inc();
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }

            // client -> hub
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_client_frame(&state, conn_id, &text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "Operator socket error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(conn_id).await;
    debug!(%conn_id, "Operator socket closed");
}

async fn handle_client_frame(
    state: &AppState,
    conn_id: flowchat_core::realtime::ConnectionId,
    text: &str,
) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Subscribe { conversation_id }) => {
            state.hub.subscribe(conn_id, conversation_id).await;
        }
        Ok(ClientFrame::Unsubscribe { conversation_id }) => {
            state.hub.unsubscribe(conn_id, conversation_id).await;
        }
        Ok(ClientFrame::Typing { conversation_id }) => {
            // typing is observed, not persisted
            debug!(%conn_id, %conversation_id, "Typing");
        }
        Err(e) => {
            debug!(%conn_id, error = %e, "Unparseable client frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_parse() {
        let id = Uuid::new_v4();
        let frame: ClientFrame = serde_json::from_str(&format!(
            r#"{{"type":"subscribe","conversation_id":"{}"}}"#,
            id
        ))
        .unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Subscribe { conversation_id } if conversation_id == id
        ));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"dance"}"#).is_err());
    }
}
