//! Session channel
//!
//! The persistent control connection to the coordinator. A lost connection
//! is re-established after a fixed delay, forever, by a reconnect task the
//! channel owns and aborts on close.

use super::transport::{Connection, Transport};
use crate::utils::error::{CaptureError, CaptureResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default pause before each reconnect attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// What [`SessionChannel::recv`] observed
#[derive(Debug)]
pub enum ChannelEvent {
    /// An inbound message
    Message(Value),
    /// The connection dropped; a reconnect is scheduled
    Disconnected,
    /// A scheduled reconnect succeeded
    Reconnected,
    /// The coordinator can never be reached
    Fatal(CaptureError),
}

/// Resilient connection to the coordinator
pub struct SessionChannel {
    transport: Arc<dyn Transport>,

    delay: Duration,

    inbound: Option<mpsc::Receiver<Value>>,

    outbound: Option<mpsc::Sender<Value>>,

    /// At most one pending reconnect
    reconnect: Option<JoinHandle<CaptureResult<Connection>>>,

    /// Reconnect attempts scheduled since the last successful connect
    attempts: u32,

    closed: bool,
}

impl SessionChannel {
    pub fn new(transport: Arc<dyn Transport>, delay: Duration) -> Self {
        Self {
            transport,
            delay,
            inbound: None,
            outbound: None,
            reconnect: None,
            attempts: 0,
            closed: false,
        }
    }

    /// Establish the initial connection.
    ///
    /// A transient failure schedules a reconnect like any later
    /// disconnection; the error is still returned so the caller can log it.
    pub async fn connect(&mut self) -> CaptureResult<()> {
        match self.transport.connect().await {
            Ok(connection) => {
                self.install(connection);
                tracing::info!("Connected to coordinator");
                Ok(())
            }
            Err(e) => {
                if !e.is_fatal() {
                    self.schedule_reconnect();
                }
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn install(&mut self, connection: Connection) {
        self.inbound = Some(connection.inbound);
        self.outbound = Some(connection.outbound);
        self.attempts = 0;
    }

    fn schedule_reconnect(&mut self) {
        if self.closed || self.reconnect.is_some() {
            return;
        }
        self.attempts += 1;
        tracing::info!(
            attempt = self.attempts,
            "Reconnecting to coordinator in {}ms",
            self.delay.as_millis()
        );

        let transport = self.transport.clone();
        let delay = self.delay;
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            transport.connect().await
        }));
    }

    /// Wait for the next channel event.
    ///
    /// Cancel safe. Never resolves once the channel is closed or has failed
    /// fatally.
    pub async fn recv(&mut self) -> ChannelEvent {
        loop {
            if self.closed {
                return std::future::pending().await;
            }

            if let Some(handle) = self.reconnect.as_mut() {
                let result = handle.await;
                self.reconnect = None;
                match result {
                    Ok(Ok(connection)) => {
                        self.install(connection);
                        tracing::info!("Reconnected to coordinator");
                        return ChannelEvent::Reconnected;
                    }
                    Ok(Err(e)) if e.is_fatal() => {
                        tracing::error!("Coordinator unavailable: {}", e);
                        self.closed = true;
                        return ChannelEvent::Fatal(e);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Reconnect failed: {}", e);
                        self.schedule_reconnect();
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Reconnect task failed: {}", e);
                        self.schedule_reconnect();
                        continue;
                    }
                }
            }

            let Some(inbound) = self.inbound.as_mut() else {
                return std::future::pending().await;
            };

            match inbound.recv().await {
                Some(message) => return ChannelEvent::Message(message),
                None => {
                    tracing::warn!("Coordinator disconnected");
                    self.inbound = None;
                    self.outbound = None;
                    self.schedule_reconnect();
                    return ChannelEvent::Disconnected;
                }
            }
        }
    }

    /// Send a message to the coordinator. Fails while disconnected.
    pub async fn send(&mut self, message: Value) -> CaptureResult<()> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(CaptureError::ChannelClosed("not connected".to_string()));
        };
        if outbound.send(message).await.is_err() {
            self.outbound = None;
            return Err(CaptureError::ChannelClosed("coordinator went away".to_string()));
        }
        Ok(())
    }

    /// Close permanently, aborting any pending reconnect
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
        self.inbound = None;
        self.outbound = None;
        tracing::info!("Session channel closed");
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::LocalTransport;
    use serde_json::json;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (transport, mut listener) = LocalTransport::new();
        let mut channel = SessionChannel::new(Arc::new(transport), DEFAULT_RECONNECT_DELAY);
        channel.connect().await.unwrap();
        let mut port = listener.accept().await.unwrap();

        port.send(json!({ "type": "IS_CAPTURING" })).await.unwrap();
        match channel.recv().await {
            ChannelEvent::Message(message) => assert_eq!(message["type"], "IS_CAPTURING"),
            other => panic!("unexpected event {other:?}"),
        }

        channel.send(json!({ "success": true })).await.unwrap();
        assert_eq!(port.recv().await, Some(json!({ "success": true })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay() {
        let (transport, mut listener) = LocalTransport::new();
        let mut channel = SessionChannel::new(Arc::new(transport.clone()), DEFAULT_RECONNECT_DELAY);
        channel.connect().await.unwrap();
        let port = listener.accept().await.unwrap();

        drop(port);
        assert!(matches!(channel.recv().await, ChannelEvent::Disconnected));
        assert!(!channel.is_connected());
        assert!(channel.has_pending_reconnect());

        // Two refused attempts, then success: three equal delays
        transport.fail_next(2);
        let started = Instant::now();
        assert!(matches!(channel.recv().await, ChannelEvent::Reconnected));
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(1600));
        assert_eq!(transport.connects(), 4);
        assert!(channel.is_connected());
        assert_eq!(channel.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_reconnect_per_disconnection() {
        let (transport, mut listener) = LocalTransport::new();
        let mut channel = SessionChannel::new(Arc::new(transport.clone()), DEFAULT_RECONNECT_DELAY);
        channel.connect().await.unwrap();

        for _ in 0..3 {
            let port = listener.accept().await.unwrap();
            drop(port);
            assert!(matches!(channel.recv().await, ChannelEvent::Disconnected));
            assert_eq!(channel.attempts(), 1);
            assert!(matches!(channel.recv().await, ChannelEvent::Reconnected));
        }
        assert_eq!(transport.connects(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_coordinator_is_fatal() {
        let (transport, mut listener) = LocalTransport::new();
        let mut channel = SessionChannel::new(Arc::new(transport), DEFAULT_RECONNECT_DELAY);
        channel.connect().await.unwrap();

        let port = listener.accept().await.unwrap();
        drop(listener);
        drop(port);

        assert!(matches!(channel.recv().await, ChannelEvent::Disconnected));
        match channel.recv().await {
            ChannelEvent::Fatal(e) => assert!(e.is_fatal()),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(channel.is_closed());
        assert!(!channel.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_aborts_pending_reconnect() {
        let (transport, mut listener) = LocalTransport::new();
        let mut channel = SessionChannel::new(Arc::new(transport.clone()), DEFAULT_RECONNECT_DELAY);
        channel.connect().await.unwrap();
        drop(listener.accept().await.unwrap());

        assert!(matches!(channel.recv().await, ChannelEvent::Disconnected));
        channel.close();
        assert!(!channel.has_pending_reconnect());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.connects(), 1);
        assert!(channel.send(json!({})).await.is_err());
    }
}
