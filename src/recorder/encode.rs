//! Still image encoding
//!
//! Frames leave the crate as small encoded stills wrapped in `data:` URLs.

use crate::utils::error::{CaptureError, CaptureResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Default lossy quality on a 0-1 scale
pub const DEFAULT_JPEG_QUALITY: f32 = 0.2;

/// Encoded still format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StillFormat {
    Jpeg,
    Png,
}

impl StillFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "image/jpeg",
            StillFormat::Png => "image/png",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" | "image/jpg" => Some(StillFormat::Jpeg),
            "image/png" => Some(StillFormat::Png),
            _ => None,
        }
    }
}

/// An encoded still image
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub format: StillFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    /// Render as a base64 `data:` URL
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.mime(), STANDARD.encode(&self.bytes))
    }

    /// Parse a base64 `data:` URL produced by [`EncodedImage::to_data_url`]
    /// or by a browser canvas
    pub fn from_data_url(url: &str) -> CaptureResult<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| CaptureError::InvalidImage("not a data URL".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| CaptureError::InvalidImage("missing data URL payload".to_string()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| CaptureError::InvalidImage("data URL is not base64".to_string()))?;
        let format = StillFormat::from_mime(mime)
            .ok_or_else(|| CaptureError::InvalidImage(format!("unsupported image type {mime}")))?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| CaptureError::InvalidImage(e.to_string()))?;

        let decoded = image::load_from_memory(&bytes)?;
        Ok(Self {
            format,
            width: decoded.width(),
            height: decoded.height(),
            bytes,
        })
    }

    /// Decode to RGBA pixels
    pub fn decode(&self) -> CaptureResult<RgbaImage> {
        Ok(image::load_from_memory(&self.bytes)?.to_rgba8())
    }
}

/// Encodes RGBA frames into stills
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEncoder {
    format: StillFormat,
    quality: f32,
}

impl FrameEncoder {
    /// Lossy JPEG at `quality` (0-1)
    pub fn jpeg(quality: f32) -> Self {
        Self {
            format: StillFormat::Jpeg,
            quality,
        }
    }

    /// Lossless PNG
    pub fn png() -> Self {
        Self {
            format: StillFormat::Png,
            quality: 1.0,
        }
    }

    pub fn format(&self) -> StillFormat {
        self.format
    }

    /// Quality mapped onto the encoder's 1-100 scale
    pub fn jpeg_quality(&self) -> u8 {
        ((self.quality.clamp(0.0, 1.0) * 100.0).round() as u8).max(1)
    }

    pub fn encode(&self, frame: &RgbaImage) -> CaptureResult<EncodedImage> {
        let bytes = match self.format {
            StillFormat::Jpeg => encode_jpeg(frame, self.jpeg_quality())?,
            StillFormat::Png => encode_png(frame)?,
        };
        Ok(EncodedImage {
            format: self.format,
            width: frame.width(),
            height: frame.height(),
            bytes,
        })
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::jpeg(DEFAULT_JPEG_QUALITY)
    }
}

fn encode_jpeg(frame: &RgbaImage, quality: u8) -> CaptureResult<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgba8(frame.clone()).to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder.encode_image(&rgb)?;
    Ok(bytes)
}

fn encode_png(frame: &RgbaImage) -> CaptureResult<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, frame.width(), frame.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(frame.as_raw())?;
    }
    Ok(bytes)
}
