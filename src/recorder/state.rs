//! Capture track state
//!
//! Defines the track state machine and the notification emitted when a
//! track stops.

use crate::capture::traits::{MediaType, TrackKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a capture track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    /// Constructed, not yet holding a live source
    #[default]
    Created,
    /// Holding a live source
    Active,
    /// Terminal
    Stopped,
}

/// Why a track was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// Explicit stop request
    Requested,
    /// The device terminated the source
    External,
    /// The paired track of a combined capture ended
    Linked,
    /// Undone after a later acquisition of the same request failed
    Rollback,
    /// Superseded by a newer track of the same media type
    Replaced,
}

/// Emitted exactly once per track, when it stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStopped {
    pub track_id: String,
    pub media_type: MediaType,
    pub kind: TrackKind,
    pub reason: StopReason,
    pub stopped_at: DateTime<Utc>,
}

/// Public description of a live track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    pub media_type: MediaType,
    pub kind: TrackKind,
    pub width: u32,
    pub height: u32,
    pub started_at: DateTime<Utc>,
}
