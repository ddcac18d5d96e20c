//! Capture track
//!
//! The unit of lifecycle: one frame source plus the surface it renders
//! into. A track is active from construction until it is stopped, and a
//! stopped track is terminal.

use super::encode::{EncodedImage, FrameEncoder};
use super::state::{StopReason, TrackInfo, TrackState, TrackStopped};
use crate::capture::source::{EndReason, FrameSource};
use crate::capture::traits::{MediaType, TrackKind};
use crate::render::page::HostPage;
use crate::render::surface::{RenderSurfaceController, SurfaceOptions};
use crate::utils::error::{CaptureError, CaptureResult};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Live (or stopped) capture track
pub struct CaptureTrack {
    id: String,
    media_type: MediaType,
    kind: TrackKind,
    width: u32,
    height: u32,
    state: TrackState,
    source: Option<FrameSource>,
    surface: Option<RenderSurfaceController>,
    page: Arc<dyn HostPage>,
    surface_options: SurfaceOptions,
    partner: Option<String>,
    started_at: DateTime<Utc>,
    stop_tx: mpsc::UnboundedSender<TrackStopped>,
}

impl CaptureTrack {
    /// Take ownership of `source`. The track is active immediately.
    pub fn new(
        source: FrameSource,
        page: Arc<dyn HostPage>,
        surface_options: SurfaceOptions,
        stop_tx: mpsc::UnboundedSender<TrackStopped>,
    ) -> Self {
        let settings = source.settings();
        let mut track = Self {
            id: source.id().to_string(),
            media_type: source.media_type(),
            kind: source.kind(),
            width: settings.width,
            height: settings.height,
            state: TrackState::Created,
            source: Some(source),
            surface: None,
            page,
            surface_options,
            partner: None,
            started_at: Utc::now(),
            stop_tx,
        };
        track.state = TrackState::Active;
        tracing::info!(
            "{} track {} active ({}x{})",
            track.media_type,
            track.id,
            track.width,
            track.height
        );
        track
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TrackState::Active
    }

    /// Id of the track this one is paired with in a combined capture
    pub fn partner(&self) -> Option<&str> {
        self.partner.as_deref()
    }

    pub(crate) fn set_partner(&mut self, partner: Option<String>) {
        self.partner = partner;
    }

    pub fn surface(&self) -> Option<&RenderSurfaceController> {
        self.surface.as_ref()
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id.clone(),
            media_type: self.media_type,
            kind: self.kind,
            width: self.width,
            height: self.height,
            started_at: self.started_at,
        }
    }

    /// Future resolving when the source ends; `None` once stopped
    pub fn ended(&self) -> Option<impl Future<Output = EndReason> + Send + 'static> {
        self.source.as_ref().map(FrameSource::ended)
    }

    /// Mount the preview surface and start playback. Repeated calls only
    /// resume playback; a stopped track ignores the call.
    pub fn play(&mut self) {
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let surface = self.surface.get_or_insert_with(|| {
            RenderSurfaceController::mount(
                self.page.clone(),
                self.media_type,
                self.surface_options.clone(),
            )
        });
        surface.attach(source);
        surface.play();
    }

    /// Grab the current raw frame
    pub async fn current_frame(&self) -> CaptureResult<RgbaImage> {
        match (&self.state, &self.source) {
            (TrackState::Active, Some(source)) => source.grab_frame().await,
            _ => Err(CaptureError::NoActiveFrame),
        }
    }

    /// Grab the current frame as an encoded still
    pub async fn current_frame_data(&self, encoder: &FrameEncoder) -> CaptureResult<EncodedImage> {
        let frame = self.current_frame().await?;
        encoder.encode(&frame)
    }

    /// Stop the track. Returns `false` if it was already stopped.
    ///
    /// Order: detach surface, release source, mark stopped, notify.
    pub fn stop(&mut self, reason: StopReason) -> bool {
        if !self.is_active() {
            return false;
        }

        if let Some(mut surface) = self.surface.take() {
            surface.destroy();
        }
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        self.state = TrackState::Stopped;

        tracing::info!("{} track {} stopped ({:?})", self.media_type, self.id, reason);

        let notification = TrackStopped {
            track_id: self.id.clone(),
            media_type: self.media_type,
            kind: self.kind,
            reason,
            stopped_at: Utc::now(),
        };
        if self.stop_tx.send(notification).is_err() {
            tracing::debug!("No listener for stop of track {}", self.id);
        }
        true
    }
}

impl Drop for CaptureTrack {
    fn drop(&mut self) {
        self.stop(StopReason::Requested);
    }
}

impl std::fmt::Debug for CaptureTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureTrack")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{SyntheticDevices, CAMERA_FILL};
    use crate::capture::traits::{CameraOptions, Constraints};
    use crate::render::page::VirtualPage;

    async fn camera_track(
        devices: &SyntheticDevices,
        page: Arc<VirtualPage>,
    ) -> (CaptureTrack, mpsc::UnboundedReceiver<TrackStopped>) {
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let source = FrameSource::acquire(devices, &Constraints::Camera(CameraOptions::default()))
            .await
            .unwrap();
        (
            CaptureTrack::new(source, page, SurfaceOptions::default(), stop_tx),
            stop_rx,
        )
    }

    #[tokio::test]
    async fn test_double_stop_notifies_once() {
        let devices = SyntheticDevices::new();
        let page = Arc::new(VirtualPage::new());
        let (mut track, mut stop_rx) = camera_track(&devices, page).await;

        assert!(track.stop(StopReason::Requested));
        assert!(!track.stop(StopReason::Requested));

        let stopped = stop_rx.try_recv().unwrap();
        assert_eq!(stopped.track_id, track.id());
        assert_eq!(stopped.reason, StopReason::Requested);
        assert!(stop_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_releases_source_and_surface() {
        let devices = SyntheticDevices::new();
        let page = Arc::new(VirtualPage::new());
        let (mut track, _stop_rx) = camera_track(&devices, page.clone()).await;

        track.play();
        assert!(track.surface().is_some());
        assert!(page.find_element("video-player-camera").is_some());

        track.stop(StopReason::Requested);

        assert_eq!(track.state(), TrackState::Stopped);
        assert!(track.surface().is_none());
        assert!(track.ended().is_none());
        assert_eq!(page.attached_count(), 0);
        assert!(devices.last_track(MediaType::Camera).unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_play_is_idempotent() {
        let devices = SyntheticDevices::new();
        let page = Arc::new(VirtualPage::new());
        let (mut track, _stop_rx) = camera_track(&devices, page.clone()).await;

        track.play();
        let video = track.surface().and_then(|s| s.video()).unwrap();
        let created = page.created_count();
        track.play();

        assert_eq!(track.surface().and_then(|s| s.video()), Some(video));
        assert_eq!(page.created_count(), created);
        assert!(page.is_playing(video));
    }

    #[tokio::test]
    async fn test_frame_only_while_active() {
        let devices = SyntheticDevices::new();
        let page = Arc::new(VirtualPage::new());
        let (mut track, _stop_rx) = camera_track(&devices, page).await;

        let frame = track.current_frame().await.unwrap();
        assert_eq!(frame.dimensions(), (640, 480));
        assert_eq!(*frame.get_pixel(3, 3), CAMERA_FILL);

        let still = track.current_frame_data(&FrameEncoder::default()).await.unwrap();
        assert_eq!((still.width, still.height), (640, 480));

        track.stop(StopReason::Requested);
        assert!(matches!(track.current_frame().await, Err(CaptureError::NoActiveFrame)));

        track.play();
        assert!(track.surface().is_none());
    }
}
