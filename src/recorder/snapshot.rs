//! Snapshot compositing
//!
//! Produces stills from the live tracks of a session. With both a screen
//! and a camera track active the camera frame is drawn over the screen
//! frame, inset from the bottom-right corner.

use super::encode::{EncodedImage, FrameEncoder, StillFormat, DEFAULT_JPEG_QUALITY};
use super::track::CaptureTrack;
use crate::capture::traits::{MediaType, TrackKind};
use crate::utils::error::{CaptureError, CaptureResult};
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

/// Where the overlay may land relative to the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayPlacement {
    /// Place exactly at the inset; parts outside the canvas are clipped
    Unclamped,
    /// Pull the overlay origin back inside the canvas
    Clamped,
}

/// Snapshot settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotConfig {
    /// Default horizontal inset of the overlay from the right edge
    pub offset_x: i64,

    /// Default vertical inset of the overlay from the bottom edge
    pub offset_y: i64,

    pub format: StillFormat,

    /// Lossy quality (0-1), ignored for PNG
    pub quality: f32,

    pub placement: OverlayPlacement,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            offset_x: 500,
            offset_y: 400,
            format: StillFormat::Jpeg,
            quality: DEFAULT_JPEG_QUALITY,
            placement: OverlayPlacement::Unclamped,
        }
    }
}

impl SnapshotConfig {
    pub fn encoder(&self) -> FrameEncoder {
        match self.format {
            StillFormat::Jpeg => FrameEncoder::jpeg(self.quality),
            StillFormat::Png => FrameEncoder::png(),
        }
    }
}

/// One still of a snapshot, tagged with the media type it shows
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotImage {
    pub media_type: MediaType,
    pub image: EncodedImage,
}

/// Builds composited snapshots
#[derive(Debug, Clone)]
pub struct SnapshotCompositor {
    config: SnapshotConfig,
    encoder: FrameEncoder,
}

impl SnapshotCompositor {
    pub fn new(config: SnapshotConfig) -> Self {
        let encoder = config.encoder();
        Self { config, encoder }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    /// Top-left corner of the overlay on a `base_width` x `base_height` canvas
    pub fn overlay_origin(
        &self,
        base_width: u32,
        base_height: u32,
        overlay_width: u32,
        overlay_height: u32,
        offset_x: i64,
        offset_y: i64,
    ) -> (i64, i64) {
        let x = i64::from(base_width).saturating_sub(offset_x);
        let y = i64::from(base_height).saturating_sub(offset_y);
        match self.config.placement {
            OverlayPlacement::Unclamped => (x, y),
            OverlayPlacement::Clamped => {
                let max_x = (i64::from(base_width) - i64::from(overlay_width)).max(0);
                let max_y = (i64::from(base_height) - i64::from(overlay_height)).max(0);
                (x.clamp(0, max_x), y.clamp(0, max_y))
            }
        }
    }

    /// Draw `overlay` at its natural size onto a copy of `base`.
    ///
    /// Frames are opaque, so overlay pixels replace base pixels.
    pub fn composite_frames(
        &self,
        base: &RgbaImage,
        overlay: &RgbaImage,
        offset_x: i64,
        offset_y: i64,
    ) -> RgbaImage {
        let (x, y) = self.overlay_origin(
            base.width(),
            base.height(),
            overlay.width(),
            overlay.height(),
            offset_x,
            offset_y,
        );
        let mut canvas = base.clone();
        imageops::replace(&mut canvas, overlay, x, y);
        canvas
    }

    /// Decode two stills, composite them and re-encode.
    ///
    /// The output has the base image's dimensions.
    pub fn composite(
        &self,
        base: &EncodedImage,
        overlay: &EncodedImage,
        offset_x: i64,
        offset_y: i64,
    ) -> CaptureResult<EncodedImage> {
        let base = base.decode()?;
        let overlay = overlay.decode()?;
        let canvas = self.composite_frames(&base, &overlay, offset_x, offset_y);
        self.encoder.encode(&canvas)
    }

    /// Snapshot the active video tracks among `tracks`.
    ///
    /// `offsets` overrides the configured overlay inset.
    pub async fn snapshot<'a, I>(
        &self,
        tracks: I,
        offsets: Option<(i64, i64)>,
    ) -> CaptureResult<Vec<SnapshotImage>>
    where
        I: IntoIterator<Item = &'a CaptureTrack>,
    {
        let mut screen = None;
        let mut camera = None;
        for track in tracks {
            if !track.is_active() || track.kind() != TrackKind::Video {
                continue;
            }
            match track.media_type() {
                MediaType::Screen => {
                    screen.get_or_insert(track);
                }
                MediaType::Camera => {
                    camera.get_or_insert(track);
                }
            }
        }

        match (screen, camera) {
            (Some(screen), Some(camera)) => {
                let (offset_x, offset_y) =
                    offsets.unwrap_or((self.config.offset_x, self.config.offset_y));
                let screen_frame = screen.current_frame().await?;
                let camera_frame = camera.current_frame().await?;
                let combined = self.composite_frames(&screen_frame, &camera_frame, offset_x, offset_y);
                tracing::debug!(
                    "Composited {}x{} camera onto {}x{} screen",
                    camera_frame.width(),
                    camera_frame.height(),
                    screen_frame.width(),
                    screen_frame.height()
                );
                Ok(vec![
                    SnapshotImage {
                        media_type: MediaType::Screen,
                        image: self.encoder.encode(&combined)?,
                    },
                    SnapshotImage {
                        media_type: MediaType::Camera,
                        image: self.encoder.encode(&camera_frame)?,
                    },
                ])
            }
            (Some(track), None) | (None, Some(track)) => Ok(vec![SnapshotImage {
                media_type: track.media_type(),
                image: track.current_frame_data(&self.encoder).await?,
            }]),
            (None, None) => Err(CaptureError::NoActiveStream),
        }
    }
}

impl Default for SnapshotCompositor {
    fn default() -> Self {
        Self::new(SnapshotConfig::default())
    }
}
