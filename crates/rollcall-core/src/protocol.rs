//! JSON wire protocol spoken over the attendance channel.
//!
//! Server messages are decoded once, at the transport boundary, into
//! [`ServerMessage`]. Nothing downstream inspects raw JSON.

use crate::types::{FaceBox, ObservationStatus, StudentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed server message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Every message kind the recognition server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Recognition state for the course is initialised.
    SessionReady,
    /// Detections for one processed frame.
    FaceData(FaceData),
    /// Non-fatal session-level error for the operator.
    Error { message: String },
    /// Any `type` this client does not understand. Ignored by the controller.
    #[serde(other)]
    Unknown,
}

/// Payload of a `face_data` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    #[serde(default)]
    pub faces: Vec<FaceReport>,
    /// Students that just crossed into confirmed presence on the server side.
    #[serde(default)]
    pub newly_recognized: Vec<RecognizedStudent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_recognized_count: Option<u32>,
}

/// One detected face as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReport {
    #[serde(rename = "box")]
    pub face_box: WireBox,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: ObservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Student id, when the server includes it on the face itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<StudentId>,
}

/// Box as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireBox {
    pub source_x: f32,
    pub source_y: f32,
    pub source_w: f32,
    pub source_h: f32,
}

impl From<WireBox> for FaceBox {
    fn from(b: WireBox) -> Self {
        FaceBox::new(b.source_x, b.source_y, b.source_w, b.source_h)
    }
}

/// Entry of `newly_recognized`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedStudent {
    pub id: StudentId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Client-to-server frame message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Base64-encoded JPEG.
    pub image: String,
}

impl FrameMessage {
    pub fn to_json(&self) -> String {
        // A struct holding a single String field always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Decode one text payload received from the server.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
