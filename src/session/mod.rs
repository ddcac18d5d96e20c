//! Capture session
//!
//! A [`Session`] owns the track registry, the snapshot compositor, the host
//! page and the coordinator channel, and drives all of them from a single
//! event loop. Track watchers and the reconnect task only forward messages
//! into that loop; every mutation happens inside it.

pub mod channel;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use channel::{ChannelEvent, SessionChannel, DEFAULT_RECONNECT_DELAY};
pub use protocol::{Command, DataUrl, Inbound, PageMessage, Rejected, Response, ResultKind};
pub use transport::{Connection, CoordinatorListener, CoordinatorPort, LocalTransport, Transport};
pub use websocket::WebSocketTransport;

use crate::capture::traits::MediaDevices;
use crate::commands::{capture, snapshot};
use crate::config::SessionConfig;
use crate::recorder::registry::{CaptureRequest, RegistryContext, SourceEnded, TrackRegistry};
use crate::recorder::snapshot::SnapshotCompositor;
use crate::recorder::state::TrackStopped;
use crate::render::page::HostPage;
use crate::utils::error::CaptureResult;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Body attribute marking the page as served by a capture agent
pub const INSTALL_MARKER: &str = "data-capture-agent";

/// One capture session on one hosted page
pub struct Session {
    page: Arc<dyn HostPage>,
    registry: TrackRegistry,
    compositor: SnapshotCompositor,
    channel: SessionChannel,
    stop_rx: mpsc::UnboundedReceiver<TrackStopped>,
    ended_rx: mpsc::UnboundedReceiver<SourceEnded>,
}

impl Session {
    pub fn new(
        config: &SessionConfig,
        devices: Arc<dyn MediaDevices>,
        page: Arc<dyn HostPage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let context = RegistryContext {
            devices,
            page: page.clone(),
            surface_options: config.surface.clone(),
            stop_tx,
            ended_tx,
        };

        Self {
            page,
            registry: TrackRegistry::new(context, config.pairing),
            compositor: SnapshotCompositor::new(config.snapshot.clone()),
            channel: SessionChannel::new(transport, config.reconnect_delay()),
            stop_rx,
            ended_rx,
        }
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &SessionChannel {
        &self.channel
    }

    /// Mark the page and connect to the coordinator.
    ///
    /// An unreachable coordinator tears the session down and is returned as
    /// an error; a transient failure leaves a reconnect scheduled.
    pub async fn start(&mut self) -> CaptureResult<()> {
        self.page
            .set_attribute(None, INSTALL_MARKER, env!("CARGO_PKG_VERSION"));

        match self.channel.connect().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                tracing::error!("Cannot reach coordinator: {}", e);
                self.fail_connection().await;
                Err(e)
            }
            Err(e) => {
                tracing::warn!("Initial connection failed, will retry: {}", e);
                Ok(())
            }
        }
    }

    /// Serve commands and relay lifecycle events until the coordinator
    /// becomes unreachable
    pub async fn run(&mut self) -> CaptureResult<()> {
        loop {
            tokio::select! {
                event = self.channel.recv() => match event {
                    ChannelEvent::Message(message) => self.handle_inbound(message).await,
                    ChannelEvent::Disconnected => {
                        tracing::debug!("Waiting for coordinator to come back");
                    }
                    ChannelEvent::Reconnected => {
                        tracing::debug!("Coordinator connection restored");
                    }
                    ChannelEvent::Fatal(e) => {
                        self.fail_connection().await;
                        return Err(e);
                    }
                },
                Some(stopped) = self.stop_rx.recv() => self.relay_stopped(stopped).await,
                Some(ended) = self.ended_rx.recv() => {
                    self.registry.handle_source_ended(&ended);
                }
            }
        }
    }

    async fn handle_inbound(&mut self, message: Value) {
        let inbound = match Inbound::parse(message) {
            Ok(inbound) => inbound,
            Err(Rejected::Unknown) => return,
            Err(Rejected::Malformed(response)) => {
                if let Err(e) = self.channel.send(response.to_value()).await {
                    tracing::warn!("Dropping response: {}", e);
                }
                return;
            }
        };
        let request_id = inbound.request_id.clone();

        if let Some(response) = self.handle_command(inbound.command).await {
            let response = response.with_request_id(request_id);
            if let Err(e) = self.channel.send(response.to_value()).await {
                tracing::warn!("Dropping response: {}", e);
            }
        }
    }

    /// Execute one command. Commands without a reply return `None`.
    pub async fn handle_command(&mut self, command: Command) -> Option<Response> {
        tracing::debug!("Handling {:?}", command);
        match command {
            Command::CameraRecord { camera_options } => Some(
                capture::record(&mut self.registry, CaptureRequest::Camera(camera_options)).await,
            ),
            Command::ScreenRecord {
                screen_options,
                stream_id,
            } => {
                let request = CaptureRequest::Screen {
                    share_target_id: stream_id,
                    options: screen_options,
                };
                Some(capture::record(&mut self.registry, request).await)
            }
            Command::ScreenAndCamera {
                screen_options,
                camera_options,
                stream_id,
            } => {
                let request = CaptureRequest::ScreenAndCamera {
                    share_target_id: stream_id,
                    screen: screen_options,
                    camera: camera_options,
                };
                Some(capture::record(&mut self.registry, request).await)
            }
            Command::CaptureShot { x, y } => {
                Some(snapshot::capture_shot(&self.compositor, &self.registry, x, y).await)
            }
            Command::StopProctor => Some(capture::stop_proctor(&mut self.registry)),
            Command::FullscreenChange { state } => {
                self.page
                    .post_message(PageMessage::FullscreenChange { state }.to_value());
                None
            }
            Command::CheckForContentScript => Some(capture::check_for_content_script()),
            Command::IsCapturing => Some(capture::is_capturing(&self.registry)),
        }
    }

    async fn relay_stopped(&mut self, stopped: TrackStopped) {
        let message = PageMessage::from(&stopped).to_value();
        self.page.post_message(message.clone());

        if !self.channel.is_connected() {
            tracing::debug!("Coordinator offline, stop of {} not relayed", stopped.track_id);
            return;
        }
        if let Err(e) = self.channel.send(message).await {
            tracing::warn!("Failed to relay stop of {}: {}", stopped.track_id, e);
        }
    }

    /// Apply every queued ended signal and relay every queued stop
    pub async fn drain_events(&mut self) {
        loop {
            if let Ok(ended) = self.ended_rx.try_recv() {
                self.registry.handle_source_ended(&ended);
                continue;
            }
            if let Ok(stopped) = self.stop_rx.try_recv() {
                self.relay_stopped(stopped).await;
                continue;
            }
            break;
        }
    }

    async fn fail_connection(&mut self) {
        self.page.detach_listener();
        self.page.post_message(PageMessage::ConnectionFailed.to_value());
        self.channel.close();
        self.registry.stop_all();
        self.drain_events().await;
    }

    /// Stop every track and close the channel for good
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down capture session");
        self.registry.stop_all();
        self.drain_events().await;
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticDevices;
    use crate::capture::traits::MediaType;
    use crate::recorder::encode::EncodedImage;
    use crate::recorder::registry::PairingPolicy;
    use crate::render::page::VirtualPage;
    use serde_json::json;
    use tokio::task::JoinHandle;

    struct Harness {
        devices: Arc<SyntheticDevices>,
        page: Arc<VirtualPage>,
        transport: LocalTransport,
        listener: CoordinatorListener,
    }

    fn session(config: SessionConfig) -> (Session, Harness) {
        let devices = Arc::new(SyntheticDevices::new());
        let page = Arc::new(VirtualPage::new());
        let (transport, listener) = LocalTransport::new();
        let session = Session::new(
            &config,
            devices.clone(),
            page.clone(),
            Arc::new(transport.clone()),
        );
        (
            session,
            Harness {
                devices,
                page,
                transport,
                listener,
            },
        )
    }

    async fn running(
        config: SessionConfig,
    ) -> (JoinHandle<CaptureResult<()>>, Harness, CoordinatorPort) {
        let (mut session, mut harness) = session(config);
        session.start().await.unwrap();
        let port = harness.listener.accept().await.unwrap();
        let handle = tokio::spawn(async move { session.run().await });
        (handle, harness, port)
    }

    async fn request(port: &mut CoordinatorPort, command: Value) -> Value {
        port.send(command).await.unwrap();
        port.recv().await.unwrap()
    }

    fn page_messages_of(page: &VirtualPage, kind: &str) -> Vec<Value> {
        page.messages()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }

    #[tokio::test]
    async fn test_start_marks_page() {
        let (mut session, harness) = session(SessionConfig::default());
        session.start().await.unwrap();

        assert_eq!(
            harness.page.body_attribute(INSTALL_MARKER).as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );
        assert!(session.channel().is_connected());
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_fails_session() {
        let (mut session, harness) = session(SessionConfig::default());
        drop(harness.listener);

        let error = session.start().await.unwrap_err();

        assert!(error.is_fatal());
        assert!(!harness.page.listener_attached());
        assert_eq!(page_messages_of(&harness.page, "CONNECTION_FAILED").len(), 1);
        assert!(session.channel().is_closed());
        assert!(!session.registry().is_capturing());
    }

    #[tokio::test]
    async fn test_combined_capture_snapshot_and_linked_stop() {
        let (handle, harness, mut port) = running(SessionConfig::default()).await;

        let response = request(
            &mut port,
            json!({ "type": "SCREEN_AND_CAMERA", "requestId": 1, "streamId": "share-1" }),
        )
        .await;
        assert_eq!(
            response,
            json!({ "requestId": 1, "success": true, "type": "SCREEN_CAPTURED" })
        );

        let response = request(&mut port, json!({ "type": "CAPTURE_SHOT", "requestId": 2 })).await;
        assert_eq!(response["type"], "SNAPSHOT_CAPTURED");
        let data_urls = response["dataUrls"].as_array().unwrap();
        assert_eq!(data_urls.len(), 2);
        assert_eq!(data_urls[0]["mediaType"], "SCREEN");
        assert_eq!(data_urls[1]["mediaType"], "CAMERA");
        let composite = EncodedImage::from_data_url(data_urls[0]["url"].as_str().unwrap()).unwrap();
        assert_eq!((composite.width, composite.height), (1920, 1080));

        harness.devices.last_track(MediaType::Camera).unwrap().end();

        let first = port.recv().await.unwrap();
        let second = port.recv().await.unwrap();
        assert_eq!(first["type"], "STREAM_STOPPED");
        assert_eq!(first["mediaType"], "CAMERA");
        assert_eq!(first["reason"], "EXTERNAL");
        assert_eq!(second["mediaType"], "SCREEN");
        assert_eq!(second["reason"], "LINKED");
        assert_eq!(page_messages_of(&harness.page, "STREAM_STOPPED").len(), 2);

        let response = request(&mut port, json!({ "type": "IS_CAPTURING", "requestId": 3 })).await;
        assert_eq!(response["capturing"], json!(false));
        assert_eq!(harness.page.attached_count(), 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_camera_denied_rolls_back_combined_capture() {
        let (mut session, harness) = session(SessionConfig::default());
        session.start().await.unwrap();
        harness.devices.set_denied(MediaType::Camera, true);

        let response = session
            .handle_command(Command::ScreenAndCamera {
                screen_options: Default::default(),
                camera_options: Default::default(),
                stream_id: "share-1".to_string(),
            })
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.kind, Some(ResultKind::CameraAccessDenied));
        assert!(!session.registry().is_capturing());

        session.drain_events().await;
        let stopped = page_messages_of(&harness.page, "STREAM_STOPPED");
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0]["mediaType"], "SCREEN");
        assert_eq!(stopped[0]["reason"], "ROLLBACK");
    }

    #[tokio::test]
    async fn test_missing_share_target_is_denied() {
        let (mut session, _harness) = session(SessionConfig::default());
        let response = session
            .handle_command(Command::ScreenRecord {
                screen_options: Default::default(),
                stream_id: String::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.kind, Some(ResultKind::ScreenAccessDenied));
        assert_eq!(response.error.map(|e| e.code).as_deref(), Some("PERMISSION_DENIED"));
    }

    #[tokio::test]
    async fn test_snapshot_without_tracks_fails() {
        let (mut session, _harness) = session(SessionConfig::default());
        let response = session
            .handle_command(Command::CaptureShot { x: None, y: None })
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.kind, Some(ResultKind::SnapshotFailed));
        assert!(response.data_urls.is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_forwarded_commands_get_no_response() {
        let (handle, harness, mut port) = running(SessionConfig::default()).await;

        port.send(json!({ "type": "CHECK_FOR_UPDATE", "requestId": 9 })).await.unwrap();
        port.send(json!({ "type": "FULLSCREEN_CHANGE", "requestId": 10, "state": true }))
            .await
            .unwrap();
        let response = request(
            &mut port,
            json!({ "type": "CHECK_FOR_CONTENT_SCRIPT", "requestId": 11 }),
        )
        .await;

        assert_eq!(response, json!({ "requestId": 11, "success": true }));
        let forwarded = page_messages_of(&harness.page, "FULLSCREEN_CHANGE");
        assert_eq!(forwarded, vec![json!({ "type": "FULLSCREEN_CHANGE", "state": true })]);

        handle.abort();
    }

    #[tokio::test]
    async fn test_malformed_command_gets_failure_response() {
        let (handle, _harness, mut port) = running(SessionConfig::default()).await;

        let response = request(
            &mut port,
            json!({ "type": "CAPTURE_SHOT", "requestId": 5, "x": 12.5 }),
        )
        .await;
        assert_eq!(response["requestId"], json!(5));
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["type"], "SNAPSHOT_FAILED");
        assert_eq!(response["error"]["code"], "INVALID_COMMAND");

        let response = request(
            &mut port,
            json!({ "type": "SCREEN_RECORD", "requestId": 6, "streamId": 42 }),
        )
        .await;
        assert_eq!(response["requestId"], json!(6));
        assert_eq!(response["type"], "SCREEN_ACCESS_DENIED");

        let response = request(
            &mut port,
            json!({ "type": "CHECK_FOR_CONTENT_SCRIPT", "requestId": 7 }),
        )
        .await;
        assert_eq!(response, json!({ "requestId": 7, "success": true }));

        handle.abort();
    }

    #[tokio::test]
    async fn test_stop_proctor_keeps_channel_open() {
        let (handle, harness, mut port) = running(SessionConfig::default()).await;

        request(&mut port, json!({ "type": "CAMERA_RECORD", "requestId": 1 })).await;
        let response = request(&mut port, json!({ "type": "STOP_PROCTOR", "requestId": 2 })).await;
        assert_eq!(response, json!({ "requestId": 2, "success": true }));

        let stopped = port.recv().await.unwrap();
        assert_eq!(stopped["type"], "STREAM_STOPPED");
        assert_eq!(stopped["reason"], "REQUESTED");

        let response = request(&mut port, json!({ "type": "IS_CAPTURING", "requestId": 3 })).await;
        assert_eq!(response["capturing"], json!(false));
        assert!(harness.devices.last_track(MediaType::Camera).unwrap().is_stopped());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracks_survive_reconnect() {
        let config = SessionConfig {
            pairing: PairingPolicy::Independent,
            ..SessionConfig::default()
        };
        let (handle, mut harness, mut port) = running(config).await;

        request(&mut port, json!({ "type": "CAMERA_RECORD", "requestId": 1 })).await;
        drop(port);

        let mut port = harness.listener.accept().await.unwrap();
        let response = request(&mut port, json!({ "type": "IS_CAPTURING", "requestId": 2 })).await;

        assert_eq!(response["capturing"], json!(true));
        assert_eq!(harness.transport.connects(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_losing_coordinator_tears_down() {
        let (handle, harness, mut port) = running(SessionConfig::default()).await;

        request(&mut port, json!({ "type": "CAMERA_RECORD", "requestId": 1 })).await;
        harness.transport.shut_down();
        drop(port);

        let result = handle.await.unwrap();
        assert!(result.unwrap_err().is_fatal());
        assert!(!harness.page.listener_attached());
        assert_eq!(page_messages_of(&harness.page, "CONNECTION_FAILED").len(), 1);
        assert_eq!(page_messages_of(&harness.page, "STREAM_STOPPED").len(), 1);
        assert!(harness.devices.last_track(MediaType::Camera).unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (mut session, harness) = session(SessionConfig::default());
        session.start().await.unwrap();
        session
            .handle_command(Command::CameraRecord {
                camera_options: Default::default(),
            })
            .await;

        session.shutdown().await;

        assert!(!session.registry().is_capturing());
        assert!(session.channel().is_closed());
        assert_eq!(page_messages_of(&harness.page, "STREAM_STOPPED").len(), 1);
    }
}
