//! Snapshot command

use crate::recorder::registry::TrackRegistry;
use crate::recorder::snapshot::SnapshotCompositor;
use crate::session::protocol::{DataUrl, Response, ResultKind};

/// Overlay inset for a snapshot; a missing coordinate falls back to the
/// configured default
pub fn snapshot_offsets(
    compositor: &SnapshotCompositor,
    x: Option<i64>,
    y: Option<i64>,
) -> Option<(i64, i64)> {
    if x.is_none() && y.is_none() {
        return None;
    }
    let config = compositor.config();
    Some((x.unwrap_or(config.offset_x), y.unwrap_or(config.offset_y)))
}

/// Snapshot the session's active tracks as data URLs
pub async fn capture_shot(
    compositor: &SnapshotCompositor,
    registry: &TrackRegistry,
    x: Option<i64>,
    y: Option<i64>,
) -> Response {
    let offsets = snapshot_offsets(compositor, x, y);
    match compositor.snapshot(registry.active(), offsets).await {
        Ok(stills) => {
            tracing::debug!("Snapshot captured ({} image(s))", stills.len());
            Response {
                data_urls: Some(stills.iter().map(DataUrl::from).collect()),
                ..Response::success(ResultKind::SnapshotCaptured)
            }
        }
        Err(e) => {
            tracing::warn!("Snapshot failed: {}", e);
            Response::failure(ResultKind::SnapshotFailed, &e)
        }
    }
}
