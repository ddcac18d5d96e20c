//! Native webcam capture using nokhwa
//!
//! Opens the camera on a dedicated thread (camera handles are not `Send` on
//! every backend) and keeps the most recent decoded frame for snapshots.
//! Screen capture is not available through this device layer.

use crate::capture::traits::{
    CameraInfo, CameraOptions, Constraints, MediaDevices, MediaType, RawTrack, TrackKind,
    TrackSettings,
};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Consecutive frame failures after which the camera is considered gone
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Frame rate assumed when only a resolution is requested
const DEFAULT_FRAME_RATE: u32 = 30;

/// Camera format to negotiate for the requested options
fn requested_format_type(options: &CameraOptions) -> RequestedFormatType {
    match (options.width, options.height, options.frame_rate) {
        (Some(width), Some(height), frame_rate) => RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::MJPEG,
            frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
        )),
        (_, _, Some(frame_rate)) => RequestedFormatType::HighestFrameRate(frame_rate),
        _ => RequestedFormatType::AbsoluteHighestResolution,
    }
}

/// Get list of available cameras
pub fn get_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

fn camera_index(options: &CameraOptions) -> CameraIndex {
    match &options.device_id {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.clone()),
        },
        None => CameraIndex::Index(0),
    }
}

/// Camera track backed by a capture thread
struct NativeCameraTrack {
    id: String,
    settings: TrackSettings,
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<RgbaImage>>>,
    ended_tx: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl RawTrack for NativeCameraTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    async fn grab_frame(&self) -> CaptureResult<RgbaImage> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::NoActiveFrame);
        }
        self.latest.lock().clone().ok_or(CaptureError::NoActiveFrame)
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopping webcam track {}", self.id);
        }
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }
}

/// Device layer for locally attached webcams
#[derive(Debug, Default)]
pub struct NativeCameraDevices;

impl NativeCameraDevices {
    pub fn new() -> Self {
        Self
    }

    async fn open_camera(&self, options: &CameraOptions) -> CaptureResult<NativeCameraTrack> {
        if get_cameras().is_empty() {
            return Err(CaptureError::DeviceUnsupported(MediaType::Camera));
        }

        let index = camera_index(options);
        let format_type = requested_format_type(options);
        let running = Arc::new(AtomicBool::new(true));
        let latest = Arc::new(Mutex::new(None));
        let (ended_tx, _) = watch::channel(false);
        let ended_tx = Arc::new(ended_tx);
        let (opened_tx, opened_rx) = oneshot::channel::<CaptureResult<TrackSettings>>();

        let thread_running = running.clone();
        let thread_latest = latest.clone();
        let thread_ended = ended_tx.clone();

        std::thread::spawn(move || {
            let format = RequestedFormat::new::<RgbAFormat>(format_type);

            let mut camera = match Camera::new(index.clone(), format) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to open camera {:?}: {:?}", index, e);
                    let _ = opened_tx.send(Err(CaptureError::acquisition(MediaType::Camera, e)));
                    return;
                }
            };

            if let Err(e) = camera.open_stream() {
                tracing::error!("Failed to open camera stream: {:?}", e);
                let _ = opened_tx.send(Err(CaptureError::PermissionDenied(MediaType::Camera)));
                return;
            }

            let camera_format = camera.camera_format();
            let settings = TrackSettings {
                width: camera_format.resolution().width(),
                height: camera_format.resolution().height(),
                frame_rate: Some(camera_format.frame_rate()),
            };
            tracing::info!(
                "Webcam opened: {}x{} @ {}fps",
                settings.width,
                settings.height,
                camera_format.frame_rate()
            );
            if opened_tx.send(Ok(settings)).is_err() {
                let _ = camera.stop_stream();
                return;
            }

            let mut failures = 0u32;
            while thread_running.load(Ordering::SeqCst) {
                // Blocks until the camera delivers the next frame
                let decoded = camera
                    .frame()
                    .and_then(|frame| frame.decode_image::<RgbAFormat>());
                match decoded {
                    Ok(buffer) => {
                        failures = 0;
                        let (width, height) = (buffer.width(), buffer.height());
                        if let Some(frame) = RgbaImage::from_raw(width, height, buffer.into_raw()) {
                            *thread_latest.lock() = Some(frame);
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::debug!("Failed to capture frame: {:?}", e);
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            tracing::warn!("Webcam stopped delivering frames, treating it as ended");
                            thread_running.store(false, Ordering::SeqCst);
                            thread_ended.send_replace(true);
                        }
                    }
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {:?}", e);
            }
            tracing::info!("Webcam capture thread stopped");
        });

        let settings = opened_rx.await.map_err(|e| CaptureError::acquisition(MediaType::Camera, e))??;

        Ok(NativeCameraTrack {
            id: uuid::Uuid::new_v4().to_string(),
            settings,
            running,
            latest,
            ended_tx,
        })
    }
}

#[async_trait]
impl MediaDevices for NativeCameraDevices {
    async fn acquire(&self, constraints: &Constraints) -> CaptureResult<Box<dyn RawTrack>> {
        match constraints {
            Constraints::Camera(options) => {
                let track = self.open_camera(options).await?;
                Ok(Box::new(track))
            }
            Constraints::Screen { .. } => Err(CaptureError::DeviceUnsupported(MediaType::Screen)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_resolution_is_closest_match() {
        let options = CameraOptions {
            width: Some(1280),
            height: Some(720),
            frame_rate: Some(15),
            ..CameraOptions::default()
        };
        assert_eq!(
            requested_format_type(&options),
            RequestedFormatType::Closest(CameraFormat::new(
                Resolution::new(1280, 720),
                FrameFormat::MJPEG,
                15
            ))
        );
    }

    #[test]
    fn test_unset_options_fall_back() {
        let rate_only = CameraOptions {
            frame_rate: Some(60),
            ..CameraOptions::default()
        };
        assert_eq!(
            requested_format_type(&rate_only),
            RequestedFormatType::HighestFrameRate(60)
        );
        assert_eq!(
            requested_format_type(&CameraOptions::default()),
            RequestedFormatType::AbsoluteHighestResolution
        );
    }
}
