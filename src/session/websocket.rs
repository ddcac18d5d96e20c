//! WebSocket transport
//!
//! Carries the coordinator protocol as JSON text frames. Each connection
//! runs a reader and a writer task bridging the socket to the connection
//! queues.

use super::transport::{Connection, Transport, CONNECTION_BUFFER};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

/// Connects to a coordinator listening on a WebSocket URL
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> CaptureResult<Connection> {
        tracing::debug!(url = %self.url, "Connecting to coordinator");

        let connecting = tokio_tungstenite::connect_async(&self.url);
        let ws_stream = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok((ws_stream, _))) => ws_stream,
            // A malformed URL will never connect
            Ok(Err(e @ (tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_)))) => {
                return Err(CaptureError::ChannelUnavailable(e.to_string()));
            }
            Ok(Err(e)) => return Err(CaptureError::ChannelClosed(e.to_string())),
            Err(_elapsed) => {
                return Err(CaptureError::ChannelClosed(format!(
                    "connection timed out after {}s",
                    self.connect_timeout.as_secs()
                )));
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (inbound_tx, inbound) = mpsc::channel(CONNECTION_BUFFER);
        let (outbound, mut outbound_rx) = mpsc::channel::<serde_json::Value>(CONNECTION_BUFFER);

        tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str(text.as_str()) {
                        Ok(value) => {
                            if inbound_tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!("Unparseable frame from coordinator: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!("Coordinator closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        });

        tokio::spawn(async move {
            while let Some(value) = outbound_rx.recv().await {
                let json = value.to_string();
                if ws_write.send(WsMessage::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        Ok(Connection { inbound, outbound })
    }
}
