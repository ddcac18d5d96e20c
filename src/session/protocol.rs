//! Wire protocol
//!
//! Commands arrive from the coordinator as JSON envelopes
//! `{ "type": KIND, "requestId"?: ..., ...fields }` and are answered with a
//! [`Response`] echoing the request id. Lifecycle events for the hosted page
//! are [`PageMessage`]s.

use crate::capture::traits::{CameraOptions, MediaType, ScreenOptions, TrackKind};
use crate::recorder::state::{StopReason, TrackStopped};
use crate::recorder::SnapshotImage;
use crate::utils::error::{CaptureError, ErrorResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands the coordinator can send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    CameraRecord {
        #[serde(default)]
        camera_options: CameraOptions,
    },

    #[serde(rename_all = "camelCase")]
    ScreenRecord {
        #[serde(default)]
        screen_options: ScreenOptions,
        #[serde(default, alias = "shareTargetId")]
        stream_id: String,
    },

    #[serde(rename_all = "camelCase")]
    ScreenAndCamera {
        #[serde(default)]
        screen_options: ScreenOptions,
        #[serde(default)]
        camera_options: CameraOptions,
        #[serde(default, alias = "shareTargetId")]
        stream_id: String,
    },

    /// Take a snapshot; `x`/`y` override the overlay inset
    CaptureShot {
        #[serde(default)]
        x: Option<i64>,
        #[serde(default)]
        y: Option<i64>,
    },

    StopProctor,

    FullscreenChange {
        #[serde(default)]
        state: Value,
    },

    /// Liveness probe
    CheckForContentScript,

    IsCapturing,
}

/// A decoded inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub request_id: Option<Value>,
    pub command: Command,
}

/// Why an envelope did not decode into a [`Command`]
#[derive(Debug, Clone)]
pub enum Rejected {
    /// Not a command kind this agent handles; dropped without a reply
    Unknown,
    /// A known kind whose fields did not decode, answered with this failure
    Malformed(Response),
}

/// Every kind [`Command`] decodes
const COMMAND_KINDS: [&str; 8] = [
    "CAMERA_RECORD",
    "SCREEN_RECORD",
    "SCREEN_AND_CAMERA",
    "CAPTURE_SHOT",
    "STOP_PROCTOR",
    "FULLSCREEN_CHANGE",
    "CHECK_FOR_CONTENT_SCRIPT",
    "IS_CAPTURING",
];

/// Result kind a failed command of `kind` reports
fn failure_kind(kind: &str) -> Option<ResultKind> {
    match kind {
        "CAMERA_RECORD" => Some(ResultKind::CameraAccessDenied),
        "SCREEN_RECORD" | "SCREEN_AND_CAMERA" => Some(ResultKind::ScreenAccessDenied),
        "CAPTURE_SHOT" => Some(ResultKind::SnapshotFailed),
        _ => None,
    }
}

impl Inbound {
    /// Decode an envelope.
    ///
    /// A known kind with undecodable fields is rejected with the failure
    /// response for that kind, carrying the request id.
    pub fn parse(value: Value) -> Result<Self, Rejected> {
        let request_id = value.get("requestId").filter(|id| !id.is_null()).cloned();
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match serde_json::from_value::<Command>(value) {
            Ok(command) => Ok(Self {
                request_id,
                command,
            }),
            Err(e) if COMMAND_KINDS.contains(&kind.as_str()) => {
                tracing::warn!(kind = %kind, "Malformed command: {}", e);
                let error = CaptureError::InvalidCommand {
                    kind: kind.clone(),
                    reason: e.to_string(),
                };
                let response = Response {
                    request_id,
                    success: false,
                    kind: failure_kind(&kind),
                    error: Some(ErrorResponse::from(&error)),
                    ..Default::default()
                };
                Err(Rejected::Malformed(response))
            }
            Err(e) => {
                tracing::debug!(kind = %kind, "Ignoring inbound message: {}", e);
                Err(Rejected::Unknown)
            }
        }
    }
}

/// Outcome kinds reported in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
    CameraCaptured,
    ScreenCaptured,
    SnapshotCaptured,
    CameraAccessDenied,
    ScreenAccessDenied,
    SnapshotFailed,
}

impl ResultKind {
    pub fn captured(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Camera => ResultKind::CameraCaptured,
            MediaType::Screen => ResultKind::ScreenCaptured,
        }
    }

    pub fn access_denied(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Camera => ResultKind::CameraAccessDenied,
            MediaType::Screen => ResultKind::ScreenAccessDenied,
        }
    }
}

/// One encoded still of a snapshot response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUrl {
    pub url: String,
    pub media_type: MediaType,
}

impl From<&SnapshotImage> for DataUrl {
    fn from(still: &SnapshotImage) -> Self {
        Self {
            url: still.image.to_data_url(),
            media_type: still.media_type,
        }
    }
}

/// Reply to a coordinator command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,

    pub success: bool,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResultKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_urls: Option<Vec<DataUrl>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capturing: Option<bool>,

    /// Diagnostic detail for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn success(kind: ResultKind) -> Self {
        Self {
            success: true,
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn failure(kind: ResultKind, error: &CaptureError) -> Self {
        Self {
            success: false,
            kind: Some(kind),
            error: Some(ErrorResponse::from(error)),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: Option<Value>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize response: {}", e);
            serde_json::json!({ "success": false })
        })
    }
}

/// Messages delivered to the hosted page (and, for stops, the coordinator)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    #[serde(rename_all = "camelCase")]
    StreamStopped {
        success: bool,
        media_type: MediaType,
        kind: TrackKind,
        track_id: String,
        reason: StopReason,
    },

    ConnectionFailed,

    FullscreenChange { state: Value },
}

impl PageMessage {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize page message: {}", e);
            Value::Null
        })
    }
}

impl From<&TrackStopped> for PageMessage {
    fn from(stopped: &TrackStopped) -> Self {
        PageMessage::StreamStopped {
            success: true,
            media_type: stopped.media_type,
            kind: stopped.kind,
            track_id: stopped.track_id.clone(),
            reason: stopped.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_screen_record_with_alias() {
        let inbound = Inbound::parse(json!({
            "type": "SCREEN_RECORD",
            "requestId": 7,
            "shareTargetId": "target-1",
            "screenOptions": { "maxWidth": 1280 }
        }))
        .unwrap();

        assert_eq!(inbound.request_id, Some(json!(7)));
        match inbound.command {
            Command::ScreenRecord {
                stream_id,
                screen_options,
            } => {
                assert_eq!(stream_id, "target-1");
                assert_eq!(screen_options.max_width, Some(1280));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_unit_and_optional_fields() {
        let stop = Inbound::parse(json!({ "type": "STOP_PROCTOR" })).unwrap();
        assert_eq!(stop.command, Command::StopProctor);
        assert_eq!(stop.request_id, None);

        let shot = Inbound::parse(json!({ "type": "CAPTURE_SHOT", "x": 300 })).unwrap();
        assert_eq!(shot.command, Command::CaptureShot { x: Some(300), y: None });

        let camera = Inbound::parse(json!({ "type": "CAMERA_RECORD" })).unwrap();
        assert_eq!(
            camera.command,
            Command::CameraRecord {
                camera_options: CameraOptions::default()
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_ignored() {
        assert!(matches!(
            Inbound::parse(json!({ "type": "CHECK_FOR_UPDATE" })),
            Err(Rejected::Unknown)
        ));
        assert!(matches!(
            Inbound::parse(json!({ "hello": "world" })),
            Err(Rejected::Unknown)
        ));
    }

    #[test]
    fn test_malformed_known_kind_is_answered() {
        let response = match Inbound::parse(json!({ "type": "CAPTURE_SHOT", "requestId": 5, "x": 12.5 })) {
            Err(Rejected::Malformed(response)) => response,
            other => panic!("expected a malformed rejection, got {other:?}"),
        };
        let value = response.to_value();
        assert_eq!(value["requestId"], json!(5));
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["type"], json!("SNAPSHOT_FAILED"));
        assert_eq!(value["error"]["code"], json!("INVALID_COMMAND"));

        let response = match Inbound::parse(json!({ "type": "SCREEN_RECORD", "streamId": 42 })) {
            Err(Rejected::Malformed(response)) => response,
            other => panic!("expected a malformed rejection, got {other:?}"),
        };
        assert_eq!(response.request_id, None);
        assert_eq!(response.kind, Some(ResultKind::ScreenAccessDenied));
    }

    #[test]
    fn test_response_shape() {
        let value = Response::success(ResultKind::CameraCaptured)
            .with_request_id(Some(json!(3)))
            .to_value();
        assert_eq!(
            value,
            json!({ "requestId": 3, "success": true, "type": "CAMERA_CAPTURED" })
        );

        let value = Response::failure(
            ResultKind::SnapshotFailed,
            &CaptureError::NoActiveStream,
        )
        .to_value();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["type"], json!("SNAPSHOT_FAILED"));
        assert_eq!(value["error"]["code"], json!("NO_ACTIVE_STREAM"));
    }

    #[test]
    fn test_stream_stopped_shape() {
        let message = PageMessage::StreamStopped {
            success: true,
            media_type: MediaType::Screen,
            kind: TrackKind::Video,
            track_id: "t1".to_string(),
            reason: StopReason::External,
        };
        let value = message.to_value();
        assert_eq!(value["type"], json!("STREAM_STOPPED"));
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["mediaType"], json!("SCREEN"));
        assert_eq!(value["kind"], json!("VIDEO"));
        assert_eq!(value["reason"], json!("EXTERNAL"));
    }
}
