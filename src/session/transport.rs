//! Coordinator transports
//!
//! A [`Transport`] opens one connection to the coordinator. A connection is
//! a pair of JSON message queues; the inbound queue closing is how a
//! disconnection is observed.

use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Queue depth of each connection direction
pub const CONNECTION_BUFFER: usize = 64;

/// One live connection to the coordinator
#[derive(Debug)]
pub struct Connection {
    /// Messages from the coordinator; yields `None` once disconnected
    pub inbound: mpsc::Receiver<Value>,

    /// Messages to the coordinator
    pub outbound: mpsc::Sender<Value>,
}

/// Opens connections to the coordinator.
///
/// `ChannelUnavailable` means the coordinator can never be reached from
/// this page; `ChannelClosed` is transient and worth retrying.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> CaptureResult<Connection>;
}

/// Coordinator end of a local connection
#[derive(Debug)]
pub struct CoordinatorPort {
    to_agent: mpsc::Sender<Value>,
    from_agent: mpsc::Receiver<Value>,
}

impl CoordinatorPort {
    /// Send a message to the agent
    pub async fn send(&self, message: Value) -> CaptureResult<()> {
        self.to_agent
            .send(message)
            .await
            .map_err(|_| CaptureError::ChannelClosed("agent went away".to_string()))
    }

    /// Next message from the agent, `None` once the agent dropped the connection
    pub async fn recv(&mut self) -> Option<Value> {
        self.from_agent.recv().await
    }

    /// Non-blocking variant of [`CoordinatorPort::recv`]
    pub fn try_recv(&mut self) -> Option<Value> {
        self.from_agent.try_recv().ok()
    }
}

/// Hands out the coordinator end of every connection a [`LocalTransport`]
/// opens. Dropping it makes the transport unavailable.
#[derive(Debug)]
pub struct CoordinatorListener {
    ports: mpsc::UnboundedReceiver<CoordinatorPort>,
}

impl CoordinatorListener {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<CoordinatorPort> {
        self.ports.recv().await
    }
}

/// In-process transport, the analogue of a runtime message port
#[derive(Clone)]
pub struct LocalTransport {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    ports: Mutex<Option<mpsc::UnboundedSender<CoordinatorPort>>>,
    failures: AtomicUsize,
    connects: AtomicUsize,
}

impl LocalTransport {
    pub fn new() -> (Self, CoordinatorListener) {
        let (ports_tx, ports_rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(LocalInner {
                ports: Mutex::new(Some(ports_tx)),
                failures: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
            }),
        };
        (transport, CoordinatorListener { ports: ports_rx })
    }

    /// Fail the next `count` connection attempts with a transient error
    pub fn fail_next(&self, count: usize) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    /// Make every further connection attempt fail permanently
    pub fn shut_down(&self) {
        self.inner.ports.lock().take();
    }

    /// Number of connection attempts so far
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self) -> CaptureResult<Connection> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let pending_failure = self
            .inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending_failure {
            return Err(CaptureError::ChannelClosed("connection refused".to_string()));
        }

        let (to_agent, inbound) = mpsc::channel(CONNECTION_BUFFER);
        let (outbound, from_agent) = mpsc::channel(CONNECTION_BUFFER);

        let ports = self.inner.ports.lock();
        let delivered = ports
            .as_ref()
            .map(|tx| tx.send(CoordinatorPort { to_agent, from_agent }).is_ok())
            .unwrap_or(false);
        if !delivered {
            return Err(CaptureError::ChannelUnavailable(
                "no coordinator is listening".to_string(),
            ));
        }

        Ok(Connection { inbound, outbound })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_connection_round_trip() {
        let (transport, mut listener) = LocalTransport::new();
        let mut connection = transport.connect().await.unwrap();
        let mut port = listener.accept().await.unwrap();

        port.send(json!({ "type": "IS_CAPTURING" })).await.unwrap();
        assert_eq!(connection.inbound.recv().await, Some(json!({ "type": "IS_CAPTURING" })));

        connection.outbound.send(json!({ "success": true })).await.unwrap();
        assert_eq!(port.recv().await, Some(json!({ "success": true })));

        drop(port);
        assert_eq!(connection.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_transient_then_permanent_failure() {
        let (transport, listener) = LocalTransport::new();
        transport.fail_next(1);

        assert!(matches!(transport.connect().await, Err(CaptureError::ChannelClosed(_))));
        assert!(transport.connect().await.is_ok());

        drop(listener);
        let error = transport.connect().await.unwrap_err();
        assert!(error.is_fatal());
        assert_eq!(transport.connects(), 3);
    }
}
