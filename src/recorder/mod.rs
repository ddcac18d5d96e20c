//! Capture track lifecycle
//!
//! This module implements the track side of a capture session:
//! - CaptureTrack owning one frame source and its preview surface
//! - TrackRegistry holding the active tracks of a session
//! - SnapshotCompositor producing encoded stills from live tracks

pub mod encode;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod track;

pub use encode::{EncodedImage, FrameEncoder, StillFormat};
pub use registry::{CaptureRequest, PairingPolicy, RegistryContext, SourceEnded, TrackRegistry};
pub use snapshot::{OverlayPlacement, SnapshotCompositor, SnapshotConfig, SnapshotImage};
pub use state::{StopReason, TrackInfo, TrackState, TrackStopped};
pub use track::CaptureTrack;
