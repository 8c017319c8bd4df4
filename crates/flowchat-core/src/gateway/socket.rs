//! Gateway event socket
//!
//! One reader task per instance, connected to the gateway's WebSocket
//! stream. Frames are parsed into [`GatewayEvent`]s and handed to the
//! ingestor channel. Reconnects use exponential backoff capped at 60 s and
//! reset after a successful connection. The whole reader shuts down
//! deterministically through its cancellation token.

use super::events::GatewayEvent;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Auto-reconnecting WebSocket reader for one gateway instance
pub struct EventSocket {
    ws_base: String,
    instance_external_id: String,
    api_key: Option<String>,
    events: mpsc::Sender<GatewayEvent>,
}

impl EventSocket {
    /// Create a new event socket
    pub fn new(
        ws_base: String,
        instance_external_id: String,
        api_key: Option<String>,
        events: mpsc::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            ws_base,
            instance_external_id,
            api_key,
            events,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.ws_base.trim_end_matches('/');
        match &self.api_key {
            Some(key) => format!("{}/{}?apikey={}", base, self.instance_external_id, key),
            None => format!("{}/{}", base, self.instance_external_id),
        }
    }

    /// Run the reader until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.read_until_closed(&cancel).await {
                Ok(()) => {
                    // clean close or cancellation
                    if cancel.is_cancelled() {
                        break;
                    }
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(
                        instance = %self.instance_external_id,
                        error = %e,
                        retry_in_secs = backoff.as_secs(),
                        "Gateway socket error"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        info!(instance = %self.instance_external_id, "Gateway socket reader stopped");
    }

    async fn read_until_closed(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let endpoint = self.endpoint();
        debug!(instance = %self.instance_external_id, "Connecting gateway socket");

        let (stream, _) = connect_async(&endpoint).await?;
        info!(instance = %self.instance_external_id, "Gateway socket connected");
        let (_, mut read) = stream.split();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(WsMessage::Binary(data))) => {
                            if let Ok(text) = String::from_utf8(data) {
                                self.handle_frame(&text).await;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            warn!(instance = %self.instance_external_id, "Gateway socket closed");
                            anyhow::bail!("connection closed");
                        }
                        Some(Ok(_)) => {} // ping/pong handled by the library
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<GatewayEvent>(text) {
            Ok(mut event) => {
                if event.instance.is_empty() {
                    event.instance = self.instance_external_id.clone();
                }
                if self.events.send(event).await.is_err() {
                    warn!(
                        instance = %self.instance_external_id,
                        "Ingest channel closed, dropping frame"
                    );
                }
            }
            Err(e) => {
                debug!(
                    instance = %self.instance_external_id,
                    error = %e,
                    "Skipping unparseable socket frame"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_includes_api_key() {
        let (tx, _rx) = mpsc::channel(1);
        let socket = EventSocket::new(
            "wss://gw.example.com/".to_string(),
            "acme".to_string(),
            Some("k1".to_string()),
            tx,
        );
        assert_eq!(socket.endpoint(), "wss://gw.example.com/acme?apikey=k1");
    }

    #[tokio::test]
    async fn test_handle_frame_forwards_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let socket = EventSocket::new(
            "wss://gw.example.com".to_string(),
            "acme".to_string(),
            None,
            tx,
        );

        socket
            .handle_frame(r#"{"event":"messages.upsert","instance":"","data":{}}"#)
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "messages.upsert");
        // empty instance backfilled from the socket's identity
        assert_eq!(event.instance, "acme");
    }

    #[tokio::test]
    async fn test_handle_frame_skips_garbage() {
        let (tx, mut rx) = mpsc::channel(4);
        let socket = EventSocket::new(
            "wss://gw.example.com".to_string(),
            "acme".to_string(),
            None,
            tx,
        );

        socket.handle_frame("not json").await;
        assert!(rx.try_recv().is_err());
    }
}
