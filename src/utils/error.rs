//! Error types and handling
//!
//! Common error types used across the capture subsystem.

use crate::capture::traits::MediaType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed lower-layer cause carried by acquisition failures
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Capture-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Permission denied for {0} capture")]
    PermissionDenied(MediaType),

    #[error("{0} capture is not supported in this environment")]
    DeviceUnsupported(MediaType),

    #[error("No active stream to capture")]
    NoActiveStream,

    #[error("No active frame: track is stopped")]
    NoActiveFrame,

    #[error("Control channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Control channel closed: {0}")]
    ChannelClosed(String),

    #[error("Failed to acquire {media_type} track: {cause}")]
    Acquisition {
        media_type: MediaType,
        #[source]
        cause: BoxedCause,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("PNG encoding error: {0}")]
    PngEncoding(#[from] png::EncodingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed {kind} command: {reason}")]
    InvalidCommand { kind: String, reason: String },
}

impl CaptureError {
    /// Wrap an opaque device-layer failure
    pub fn acquisition(media_type: MediaType, cause: impl Into<BoxedCause>) -> Self {
        CaptureError::Acquisition {
            media_type,
            cause: cause.into(),
        }
    }

    /// Media type an acquisition failure refers to, if any
    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            CaptureError::PermissionDenied(m) | CaptureError::DeviceUnsupported(m) => Some(*m),
            CaptureError::Acquisition { media_type, .. } => Some(*media_type),
            _ => None,
        }
    }

    /// Whether this error ends the page session instead of producing a response
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::ChannelUnavailable(_))
    }
}

/// Error response for the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CaptureError> for ErrorResponse {
    fn from(error: &CaptureError) -> Self {
        let code = match error {
            CaptureError::PermissionDenied(_) => "PERMISSION_DENIED",
            CaptureError::DeviceUnsupported(_) => "DEVICE_UNSUPPORTED",
            CaptureError::NoActiveStream => "NO_ACTIVE_STREAM",
            CaptureError::NoActiveFrame => "NO_ACTIVE_FRAME",
            CaptureError::ChannelUnavailable(_) => "CHANNEL_UNAVAILABLE",
            CaptureError::ChannelClosed(_) => "CHANNEL_CLOSED",
            CaptureError::Acquisition { .. } => "ACQUISITION_ERROR",
            CaptureError::Image(_)
            | CaptureError::InvalidImage(_)
            | CaptureError::PngEncoding(_) => "IMAGE_ERROR",
            CaptureError::Io(_) => "IO_ERROR",
            CaptureError::Serialization(_) => "SERIALIZATION_ERROR",
            CaptureError::InvalidConfig(_) => "INVALID_CONFIG",
            CaptureError::InvalidCommand { .. } => "INVALID_COMMAND",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;
