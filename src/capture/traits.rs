//! Capture trait definitions
//!
//! Platform-agnostic types and traits for the device layer that hands out
//! raw camera and screen tracks.

use crate::utils::error::CaptureResult;
use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Origin classification of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Camera,
    Screen,
}

impl MediaType {
    /// Lowercase slug used in element ids
    pub fn slug(&self) -> &'static str {
        match self {
            MediaType::Camera => "camera",
            MediaType::Screen => "screen",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Camera => write!(f, "CAMERA"),
            MediaType::Screen => write!(f, "SCREEN"),
        }
    }
}

/// Audio/video kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,
}

/// Camera acquisition options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraOptions {
    /// Device ID/index to capture from (None = default camera)
    pub device_id: Option<String>,

    /// Requested width in pixels
    pub width: Option<u32>,

    /// Requested height in pixels
    pub height: Option<u32>,

    /// Requested frame rate
    pub frame_rate: Option<u32>,
}

/// Screen acquisition options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenOptions {
    /// Upper bound on captured width
    pub max_width: Option<u32>,

    /// Upper bound on captured height
    pub max_height: Option<u32>,
}

/// Constraints handed to the device layer
#[derive(Debug, Clone, PartialEq)]
pub enum Constraints {
    Camera(CameraOptions),
    Screen {
        /// Opaque share-target id granted by the coordinator
        share_target_id: String,
        options: ScreenOptions,
    },
}

impl Constraints {
    pub fn media_type(&self) -> MediaType {
        match self {
            Constraints::Camera(_) => MediaType::Camera,
            Constraints::Screen { .. } => MediaType::Screen,
        }
    }
}

/// Settings the device actually delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<u32>,
}

/// One raw hardware track handed out by the device layer
#[async_trait]
pub trait RawTrack: Send + Sync {
    /// Stable identity of the underlying track
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn settings(&self) -> TrackSettings;

    /// Grab the frame currently presented by the track
    async fn grab_frame(&self) -> CaptureResult<RgbaImage>;

    /// Release the hardware handle. Idempotent.
    fn stop(&self);

    /// Flips to `true` when the device terminates the track on its own
    /// (permission revoked, device unplugged, share dialog closed).
    fn ended(&self) -> watch::Receiver<bool>;
}

/// Device layer that grants raw tracks
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &Constraints) -> CaptureResult<Box<dyn RawTrack>>;
}
