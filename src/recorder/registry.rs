//! Track registry
//!
//! Holds the capture tracks of one session in creation order and services
//! the multi-track operations: create, stop all, stop by media type, and
//! external termination.

use super::state::{StopReason, TrackInfo, TrackStopped};
use super::track::CaptureTrack;
use crate::capture::source::{EndReason, FrameSource};
use crate::capture::traits::{CameraOptions, Constraints, MediaDevices, MediaType, ScreenOptions};
use crate::render::page::HostPage;
use crate::render::surface::SurfaceOptions;
use crate::utils::error::CaptureResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// How the two halves of a combined capture relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingPolicy {
    /// An external stop of either half stops the other
    #[default]
    Linked,
    /// Halves stop separately
    Independent,
}

/// What to capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureRequest {
    Camera(CameraOptions),
    Screen {
        share_target_id: String,
        options: ScreenOptions,
    },
    ScreenAndCamera {
        share_target_id: String,
        screen: ScreenOptions,
        camera: CameraOptions,
    },
}

impl CaptureRequest {
    /// Constraints in acquisition order: screen before camera
    fn constraints(&self) -> Vec<Constraints> {
        match self {
            CaptureRequest::Camera(options) => vec![Constraints::Camera(options.clone())],
            CaptureRequest::Screen {
                share_target_id,
                options,
            } => vec![Constraints::Screen {
                share_target_id: share_target_id.clone(),
                options: options.clone(),
            }],
            CaptureRequest::ScreenAndCamera {
                share_target_id,
                screen,
                camera,
            } => vec![
                Constraints::Screen {
                    share_target_id: share_target_id.clone(),
                    options: screen.clone(),
                },
                Constraints::Camera(camera.clone()),
            ],
        }
    }

    /// Media type reported on success
    pub fn primary_media_type(&self) -> MediaType {
        match self {
            CaptureRequest::Camera(_) => MediaType::Camera,
            CaptureRequest::Screen { .. } | CaptureRequest::ScreenAndCamera { .. } => {
                MediaType::Screen
            }
        }
    }
}

/// Forwarded by a track's ended watcher into the session loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEnded {
    pub track_id: String,
    pub reason: EndReason,
}

/// Collaborators every new track is wired to
#[derive(Clone)]
pub struct RegistryContext {
    pub devices: Arc<dyn MediaDevices>,
    pub page: Arc<dyn HostPage>,
    pub surface_options: SurfaceOptions,
    pub stop_tx: mpsc::UnboundedSender<TrackStopped>,
    pub ended_tx: mpsc::UnboundedSender<SourceEnded>,
}

/// Active capture tracks of a session
pub struct TrackRegistry {
    /// Tracks in creation order; stopped entries are pruned lazily
    tracks: Vec<CaptureTrack>,

    pairing: PairingPolicy,

    context: RegistryContext,
}

impl TrackRegistry {
    pub fn new(context: RegistryContext, pairing: PairingPolicy) -> Self {
        Self {
            tracks: Vec::new(),
            pairing,
            context,
        }
    }

    pub fn pairing(&self) -> PairingPolicy {
        self.pairing
    }

    fn prune(&mut self) {
        self.tracks.retain(CaptureTrack::is_active);
    }

    /// Acquire, mount and play the tracks named by `request`.
    ///
    /// Either every requested track becomes active or none does: a failed
    /// camera acquisition in a combined request stops the screen track that
    /// was already acquired before the error is returned.
    pub async fn create_tracks(&mut self, request: CaptureRequest) -> CaptureResult<Vec<TrackInfo>> {
        self.prune();

        let mut created: Vec<CaptureTrack> = Vec::new();
        for constraints in request.constraints() {
            match FrameSource::acquire(self.context.devices.as_ref(), &constraints).await {
                Ok(source) => created.push(CaptureTrack::new(
                    source,
                    self.context.page.clone(),
                    self.context.surface_options.clone(),
                    self.context.stop_tx.clone(),
                )),
                Err(e) => {
                    tracing::warn!("{} acquisition failed: {}", constraints.media_type(), e);
                    for mut track in created {
                        track.stop(StopReason::Rollback);
                    }
                    return Err(e);
                }
            }
        }

        for media_type in created.iter().map(CaptureTrack::media_type).collect::<Vec<_>>() {
            self.stop_where(|t| t.media_type() == media_type, StopReason::Replaced);
        }

        if self.pairing == PairingPolicy::Linked && created.len() == 2 {
            let ids: Vec<String> = created.iter().map(|t| t.id().to_string()).collect();
            created[0].set_partner(Some(ids[1].clone()));
            created[1].set_partner(Some(ids[0].clone()));
        }

        let mut infos = Vec::with_capacity(created.len());
        for mut track in created {
            self.watch_ended(&track);
            track.play();
            infos.push(track.info());
            self.tracks.push(track);
        }

        tracing::info!("{} track(s) now active", self.tracks.len());
        Ok(infos)
    }

    fn watch_ended(&self, track: &CaptureTrack) {
        let Some(ended) = track.ended() else {
            return;
        };
        let ended_tx = self.context.ended_tx.clone();
        let track_id = track.id().to_string();

        tokio::spawn(async move {
            let reason = ended.await;
            // The session may already be gone
            let _ = ended_tx.send(SourceEnded { track_id, reason });
        });
    }

    fn stop_where(&mut self, mut predicate: impl FnMut(&CaptureTrack) -> bool, reason: StopReason) -> usize {
        let mut stopped = 0;
        for track in self.tracks.iter_mut().filter(|t| predicate(t)) {
            if track.stop(reason) {
                stopped += 1;
            }
        }
        self.prune();
        stopped
    }

    /// Stop every active track. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.stop_where(|_| true, StopReason::Requested);
        if stopped > 0 {
            tracing::info!("Stopped all tracks ({})", stopped);
        }
        stopped
    }

    /// Stop the active tracks of one media type
    pub fn stop_by_kind(&mut self, media_type: MediaType) -> usize {
        self.stop_where(|t| t.media_type() == media_type, StopReason::Requested)
    }

    /// Apply a source end reported by a watcher.
    ///
    /// Requested ends are echoes of stops already applied and are ignored.
    /// Returns how many tracks were stopped.
    pub fn handle_source_ended(&mut self, ended: &SourceEnded) -> usize {
        if ended.reason != EndReason::External {
            return 0;
        }

        let Some(track) = self
            .tracks
            .iter_mut()
            .find(|t| t.is_active() && t.id() == ended.track_id)
        else {
            tracing::debug!("Ended signal for unknown track {}", ended.track_id);
            return 0;
        };

        track.stop(StopReason::External);
        let mut stopped = 1;

        if self.pairing == PairingPolicy::Linked {
            if let Some(partner) = track.partner().map(str::to_string) {
                stopped += self.stop_where(|t| t.id() == partner, StopReason::Linked);
            }
        }

        self.prune();
        stopped
    }

    pub fn is_capturing(&self) -> bool {
        self.tracks.iter().any(CaptureTrack::is_active)
    }

    /// Active tracks in creation order
    pub fn active(&self) -> impl Iterator<Item = &CaptureTrack> {
        self.tracks.iter().filter(|t| t.is_active())
    }

    pub fn get(&self, track_id: &str) -> Option<&CaptureTrack> {
        self.active().find(|t| t.id() == track_id)
    }
}
