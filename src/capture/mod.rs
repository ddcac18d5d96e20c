//! Capture sources
//!
//! This module provides the device layer traits, the frame source wrapper
//! and the available device implementations.

pub mod source;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "native-camera")]
pub mod webcam;

pub use source::{EndReason, FrameSource};
pub use synthetic::{SyntheticDevices, SyntheticTrack};
pub use traits::{
    CameraOptions, Constraints, MediaDevices, MediaType, RawTrack, Resolution, ScreenOptions,
    TrackKind, TrackSettings,
};
