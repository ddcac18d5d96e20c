//! Frame source
//!
//! Wraps one raw hardware track with its media type and a single-shot
//! termination signal shared by hardware-initiated and caller-initiated stops.

use super::traits::{Constraints, MediaDevices, MediaType, RawTrack, TrackKind, TrackSettings};
use crate::utils::error::{CaptureError, CaptureResult};
use image::RgbaImage;
use std::future::Future;
use tokio::sync::watch;

/// Why a frame source ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// `stop()` was called on the source
    Requested,
    /// The device or browser layer terminated the track
    External,
}

/// A single acquired camera or screen track
pub struct FrameSource {
    raw: Box<dyn RawTrack>,
    media_type: MediaType,
    active: bool,
    stopped_tx: watch::Sender<bool>,
}

impl FrameSource {
    /// Acquire a new source from the device layer
    pub async fn acquire(
        devices: &dyn MediaDevices,
        constraints: &Constraints,
    ) -> CaptureResult<Self> {
        let media_type = constraints.media_type();

        if let Constraints::Screen { share_target_id, .. } = constraints {
            if share_target_id.is_empty() {
                tracing::warn!("Screen capture requested without a share target");
                return Err(CaptureError::PermissionDenied(MediaType::Screen));
            }
        }

        let raw = devices.acquire(constraints).await?;
        tracing::debug!("Acquired {} track {}", media_type, raw.id());
        Ok(Self::from_raw(raw, media_type))
    }

    /// Wrap an already-acquired raw track
    pub fn from_raw(raw: Box<dyn RawTrack>, media_type: MediaType) -> Self {
        let (stopped_tx, _) = watch::channel(false);
        Self {
            raw,
            media_type,
            active: true,
            stopped_tx,
        }
    }

    /// Identity of the underlying track
    pub fn id(&self) -> &str {
        self.raw.id()
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn kind(&self) -> TrackKind {
        self.raw.kind()
    }

    pub fn settings(&self) -> TrackSettings {
        self.raw.settings()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Grab the current frame
    pub async fn grab_frame(&self) -> CaptureResult<RgbaImage> {
        if !self.active {
            return Err(CaptureError::NoActiveFrame);
        }
        self.raw.grab_frame().await
    }

    /// Release the hardware handle. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.raw.stop();
        self.stopped_tx.send_replace(true);
        tracing::debug!("Released {} track {}", self.media_type, self.raw.id());
    }

    /// Resolves exactly once, when the source ends for any reason.
    ///
    /// The returned future does not borrow the source, so it can be moved
    /// into a watcher task.
    pub fn ended(&self) -> impl Future<Output = EndReason> + Send + 'static {
        let mut hardware = self.raw.ended();
        let mut requested = self.stopped_tx.subscribe();

        async move {
            tokio::select! {
                biased;
                _ = requested.wait_for(|stopped| *stopped) => EndReason::Requested,
                _ = hardware.wait_for(|ended| *ended) => EndReason::External,
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("id", &self.raw.id())
            .field("media_type", &self.media_type)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticDevices;
    use crate::capture::traits::{CameraOptions, ScreenOptions};

    #[tokio::test]
    async fn test_stop_is_idempotent_and_signals_requested() {
        let devices = SyntheticDevices::new();
        let mut source = FrameSource::acquire(&devices, &Constraints::Camera(CameraOptions::default()))
            .await
            .unwrap();
        let ended = source.ended();

        source.stop();
        source.stop();

        assert!(!source.is_active());
        assert_eq!(ended.await, EndReason::Requested);
        assert!(devices.last_track(MediaType::Camera).unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_hardware_end_signals_external() {
        let devices = SyntheticDevices::new();
        let source = FrameSource::acquire(&devices, &Constraints::Camera(CameraOptions::default()))
            .await
            .unwrap();
        let ended = source.ended();

        devices.last_track(MediaType::Camera).unwrap().end();

        assert_eq!(ended.await, EndReason::External);
    }

    #[tokio::test]
    async fn test_screen_without_share_target_is_denied() {
        let devices = SyntheticDevices::new();
        let constraints = Constraints::Screen {
            share_target_id: String::new(),
            options: ScreenOptions::default(),
        };
        let result = FrameSource::acquire(&devices, &constraints).await;
        assert!(matches!(result, Err(CaptureError::PermissionDenied(MediaType::Screen))));
    }

    #[tokio::test]
    async fn test_grab_after_stop_fails() {
        let devices = SyntheticDevices::new();
        let mut source = FrameSource::acquire(&devices, &Constraints::Camera(CameraOptions::default()))
            .await
            .unwrap();
        assert!(source.grab_frame().await.is_ok());
        source.stop();
        assert!(matches!(source.grab_frame().await, Err(CaptureError::NoActiveFrame)));
    }
}
