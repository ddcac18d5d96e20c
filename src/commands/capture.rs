//! Capture lifecycle commands

use crate::recorder::registry::{CaptureRequest, TrackRegistry};
use crate::session::protocol::{Response, ResultKind};

/// Start capturing the tracks named by `request`.
///
/// Any acquisition failure, whatever its cause, is reported as access
/// denied for the media type that failed.
pub async fn record(registry: &mut TrackRegistry, request: CaptureRequest) -> Response {
    let primary = request.primary_media_type();
    match registry.create_tracks(request).await {
        Ok(tracks) => {
            for track in &tracks {
                tracing::info!(
                    "{} captured at {}x{} ({})",
                    track.media_type,
                    track.width,
                    track.height,
                    track.id
                );
            }
            Response::success(ResultKind::captured(primary))
        }
        Err(e) => {
            let failed = e.media_type().unwrap_or(primary);
            tracing::warn!("Capture of {} denied: {}", failed, e);
            Response::failure(ResultKind::access_denied(failed), &e)
        }
    }
}

/// Stop every track. The session stays connected.
pub fn stop_proctor(registry: &mut TrackRegistry) -> Response {
    let stopped = registry.stop_all();
    tracing::info!("Proctoring stopped ({} track(s))", stopped);
    Response::ok()
}

pub fn is_capturing(registry: &TrackRegistry) -> Response {
    Response {
        capturing: Some(registry.is_capturing()),
        ..Response::ok()
    }
}

/// Liveness probe from the coordinator
pub fn check_for_content_script() -> Response {
    Response::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticDevices;
    use crate::capture::traits::{CameraOptions, MediaType, ScreenOptions};
    use crate::recorder::registry::{PairingPolicy, RegistryContext};
    use crate::render::page::VirtualPage;
    use crate::render::surface::SurfaceOptions;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn registry(devices: Arc<SyntheticDevices>) -> TrackRegistry {
        let (stop_tx, _) = mpsc::unbounded_channel();
        let (ended_tx, _) = mpsc::unbounded_channel();
        let context = RegistryContext {
            devices,
            page: Arc::new(VirtualPage::new()),
            surface_options: SurfaceOptions::default(),
            stop_tx,
            ended_tx,
        };
        TrackRegistry::new(context, PairingPolicy::Linked)
    }

    #[tokio::test]
    async fn test_unsupported_camera_is_access_denied() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.set_unsupported(MediaType::Camera);
        let mut registry = registry(devices);

        let response = record(&mut registry, CaptureRequest::Camera(CameraOptions::default())).await;

        assert!(!response.success);
        assert_eq!(response.kind, Some(ResultKind::CameraAccessDenied));
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some("DEVICE_UNSUPPORTED")
        );
        assert!(!registry.is_capturing());
    }

    #[tokio::test]
    async fn test_combined_reports_the_failing_half() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.set_unsupported(MediaType::Camera);
        let mut registry = registry(devices.clone());

        let request = CaptureRequest::ScreenAndCamera {
            share_target_id: "share-1".to_string(),
            screen: ScreenOptions::default(),
            camera: CameraOptions::default(),
        };
        let response = record(&mut registry, request).await;

        assert_eq!(response.kind, Some(ResultKind::CameraAccessDenied));
        assert!(devices.last_track(MediaType::Screen).unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_stop_proctor_then_is_capturing() {
        let mut registry = registry(Arc::new(SyntheticDevices::new()));
        record(&mut registry, CaptureRequest::Camera(CameraOptions::default())).await;
        assert_eq!(is_capturing(&registry).capturing, Some(true));

        assert!(stop_proctor(&mut registry).success);
        assert_eq!(is_capturing(&registry).capturing, Some(false));
    }
}
