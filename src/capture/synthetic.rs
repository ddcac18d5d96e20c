//! Synthetic capture devices
//!
//! A virtual camera and screen that hand out generated frames. Used for
//! headless agents and tests: permissions can be denied, capabilities
//! removed, and hardware termination simulated per track.

use super::traits::{
    Constraints, MediaDevices, MediaType, RawTrack, Resolution, TrackKind, TrackSettings,
};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Fill color of synthetic camera frames
pub const CAMERA_FILL: Rgba<u8> = Rgba([200, 40, 40, 255]);

/// Fill color of synthetic screen frames
pub const SCREEN_FILL: Rgba<u8> = Rgba([30, 60, 200, 255]);

struct SyntheticTrackInner {
    id: String,
    media_type: MediaType,
    resolution: Resolution,
    frame_rate: Option<u32>,
    stopped: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

/// Handle to a track produced by [`SyntheticDevices`]
#[derive(Clone)]
pub struct SyntheticTrack {
    inner: Arc<SyntheticTrackInner>,
}

impl SyntheticTrack {
    fn new(media_type: MediaType, resolution: Resolution, frame_rate: Option<u32>) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SyntheticTrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                media_type,
                resolution,
                frame_rate,
                stopped: AtomicBool::new(false),
                ended_tx,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn media_type(&self) -> MediaType {
        self.inner.media_type
    }

    /// Whether the consumer released this track
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Simulate the device terminating the track (revoked permission,
    /// unplugged camera, closed share dialog)
    pub fn end(&self) {
        tracing::debug!("Synthetic {} track {} ended by device", self.inner.media_type, self.inner.id);
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.ended_tx.send_replace(true);
    }

    fn fill(&self) -> Rgba<u8> {
        match self.inner.media_type {
            MediaType::Camera => CAMERA_FILL,
            MediaType::Screen => SCREEN_FILL,
        }
    }
}

#[async_trait]
impl RawTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn settings(&self) -> TrackSettings {
        TrackSettings {
            width: self.inner.resolution.width,
            height: self.inner.resolution.height,
            frame_rate: self.inner.frame_rate,
        }
    }

    async fn grab_frame(&self) -> CaptureResult<RgbaImage> {
        if self.is_stopped() {
            return Err(CaptureError::NoActiveFrame);
        }
        let Resolution { width, height } = self.inner.resolution;
        Ok(RgbaImage::from_pixel(width, height, self.fill()))
    }

    fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.inner.ended_tx.subscribe()
    }
}

/// Virtual device layer
pub struct SyntheticDevices {
    camera_resolution: Resolution,
    screen_resolution: Resolution,
    denied: Mutex<HashSet<MediaType>>,
    unsupported: Mutex<HashSet<MediaType>>,
    issued: Mutex<Vec<SyntheticTrack>>,
    acquisitions: AtomicUsize,
}

impl SyntheticDevices {
    /// Camera at 640x480, screen at 1920x1080
    pub fn new() -> Self {
        Self::with_resolutions(
            Resolution {
                width: 640,
                height: 480,
            },
            Resolution {
                width: 1920,
                height: 1080,
            },
        )
    }

    pub fn with_resolutions(camera: Resolution, screen: Resolution) -> Self {
        Self {
            camera_resolution: camera,
            screen_resolution: screen,
            denied: Mutex::new(HashSet::new()),
            unsupported: Mutex::new(HashSet::new()),
            issued: Mutex::new(Vec::new()),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Make the user decline (or accept again) capture of `media_type`
    pub fn set_denied(&self, media_type: MediaType, denied: bool) {
        let mut set = self.denied.lock();
        if denied {
            set.insert(media_type);
        } else {
            set.remove(&media_type);
        }
    }

    /// Remove the capability for `media_type` entirely
    pub fn set_unsupported(&self, media_type: MediaType) {
        self.unsupported.lock().insert(media_type);
    }

    /// Most recently issued track of `media_type`
    pub fn last_track(&self, media_type: MediaType) -> Option<SyntheticTrack> {
        self.issued
            .lock()
            .iter()
            .rev()
            .find(|t| t.media_type() == media_type)
            .cloned()
    }

    /// Every track issued so far, in order
    pub fn issued(&self) -> Vec<SyntheticTrack> {
        self.issued.lock().clone()
    }

    /// Number of acquisition attempts, including failed ones
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self, constraints: &Constraints) -> CaptureResult<Box<dyn RawTrack>> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let media_type = constraints.media_type();

        if self.unsupported.lock().contains(&media_type) {
            return Err(CaptureError::DeviceUnsupported(media_type));
        }
        if self.denied.lock().contains(&media_type) {
            return Err(CaptureError::PermissionDenied(media_type));
        }

        let (resolution, frame_rate) = match constraints {
            Constraints::Camera(options) => (
                Resolution {
                    width: options.width.unwrap_or(self.camera_resolution.width),
                    height: options.height.unwrap_or(self.camera_resolution.height),
                },
                options.frame_rate.or(Some(30)),
            ),
            Constraints::Screen { options, .. } => (
                Resolution {
                    width: options
                        .max_width
                        .map_or(self.screen_resolution.width, |w| w.min(self.screen_resolution.width)),
                    height: options
                        .max_height
                        .map_or(self.screen_resolution.height, |h| h.min(self.screen_resolution.height)),
                },
                None,
            ),
        };

        let track = SyntheticTrack::new(media_type, resolution, frame_rate);
        self.issued.lock().push(track.clone());
        Ok(Box::new(track))
    }
}
