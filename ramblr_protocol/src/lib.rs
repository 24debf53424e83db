use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ScreenVertex {
    pub x: f64,
    pub y: f64,
}

impl ScreenVertex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One object reported by a `frame_detection` message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionPayload {
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub vertices: Vec<ScreenVertex>,
    #[serde(default)]
    pub raw: Value,
}

/// One step of a process. `index` is the catalog position reported by the
/// server and is not guaranteed to be contiguous.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstructionPayload {
    pub index: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub raw: Value,
}

impl InstructionPayload {
    pub fn raw_id(&self) -> Option<&Value> {
        self.raw.get("id").filter(|id| !id.is_null())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl ContentType {
    pub fn as_mime(self) -> &'static str {
        match self {
            ContentType::Jpeg => "image/jpeg",
            ContentType::Png => "image/png",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ClientMessage {
    ImageData {
        frame_correlation_id: String,
        content_type: ContentType,
        width: u32,
        height: u32,
        size: usize,
        base64_image: String,
        expecting_binary: bool,
    },
}

impl ClientMessage {
    pub fn image_data(
        frame_id: u64,
        content_type: ContentType,
        width: u32,
        height: u32,
        base64_image: String,
    ) -> Self {
        ClientMessage::ImageData {
            frame_correlation_id: frame_id.to_string(),
            content_type,
            width,
            height,
            size: base64_image.len(),
            base64_image,
            expecting_binary: false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::ImageData { .. } => "image_data",
        }
    }
}

/// Discriminator of inbound server messages. Inbound payloads are too
/// irregular for a typed enum, so only the `type` field is modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    SessionInit,
    FrameDetection,
    SessionFeedback,
    ProcessStateChanged,
    Message,
    Meta,
    Error,
    Unknown(Option<String>),
}

impl MessageKind {
    pub fn of(payload: &Value) -> Self {
        match payload.get("type").and_then(Value::as_str) {
            Some("session_init") => MessageKind::SessionInit,
            Some("frame_detection") => MessageKind::FrameDetection,
            Some("session_feedback") => MessageKind::SessionFeedback,
            Some("session_process_state_changed") => MessageKind::ProcessStateChanged,
            Some("message") => MessageKind::Message,
            Some("meta") => MessageKind::Meta,
            Some("error") => MessageKind::Error,
            Some(other) => MessageKind::Unknown(Some(other.to_string())),
            None => MessageKind::Unknown(None),
        }
    }
}
