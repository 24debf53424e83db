use crate::extract::{
    as_index, as_text, first_defined, first_non_empty_array, first_present, is_present,
    number_or_zero, DETECTION_LABEL_PATHS, DETECTION_LIST_PATHS, ERROR_TEXT_PATHS,
    FEEDBACK_INSTRUCTION_PATHS, FETCHED_CATALOG_PATHS, MESSAGE_CATALOG_PATHS, PROCESS_ID_PATHS,
    VERTEX_LIST_PATHS,
};
use ramblr_protocol::{DetectionPayload, InstructionPayload, MessageKind, ScreenVertex};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const STATUS_PROCESS_ACTIVE: &str = "Session active, processing frames...";
pub const STATUS_NO_PROCESS: &str = "Connected (no active process)";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty websocket payload")]
    Empty,
    #[error("websocket payload parse error: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteEffect {
    /// Replaces the latest-detections snapshot.
    Detections(Vec<DetectionPayload>),
    /// Replaces the latest-instruction snapshot and moves the catalog position.
    Instruction(InstructionPayload),
    StatusText(String),
    /// First process id seen on this session.
    ProcessId(String),
    FetchCatalog(String),
    ReplaceCatalog(Vec<InstructionPayload>),
}

pub fn parse_payload(raw: &str) -> Result<Value, ProtocolError> {
    if raw.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(raw)?)
}

/// Routes one text frame. `known_process_id` is the id already captured on
/// the current session, if any.
pub fn route(raw: &str, known_process_id: Option<&str>) -> Vec<RouteEffect> {
    match parse_payload(raw) {
        Ok(payload) => route_payload(&payload, known_process_id),
        Err(ProtocolError::Empty) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "dropping malformed server message");
            Vec::new()
        }
    }
}

pub fn route_payload(payload: &Value, known_process_id: Option<&str>) -> Vec<RouteEffect> {
    let mut effects = Vec::new();
    let kind = MessageKind::of(payload);
    debug!(?kind, "received message");

    match kind {
        MessageKind::SessionInit => {
            match first_present(payload, &[&["process_id"]]).and_then(as_text) {
                Some(process_id) => {
                    info!(%process_id, "session initialized with active process");
                    if let Some(state) = payload
                        .get("current_process_state")
                        .and_then(|s| s.get("state_name"))
                        .and_then(Value::as_str)
                    {
                        info!(state, "current process state");
                    }
                    effects.push(RouteEffect::StatusText(STATUS_PROCESS_ACTIVE.to_string()));
                    effects.push(RouteEffect::FetchCatalog(process_id));
                }
                None => {
                    error!("no active process: process_id is null; the skill may need configuration");
                    effects.push(RouteEffect::StatusText(STATUS_NO_PROCESS.to_string()));
                }
            }
        }
        MessageKind::FrameDetection => {
            let detections = parse_detections(payload);
            if !detections.is_empty() {
                effects.push(RouteEffect::StatusText(detection_summary(&detections)));
            }
            effects.push(RouteEffect::Detections(detections));
        }
        MessageKind::SessionFeedback => {
            debug!(feedback_type = ?payload.get("feedback_type"), "session feedback");
            match extract_instruction(payload) {
                Some(instruction) => {
                    effects.push(RouteEffect::StatusText(instruction.description.clone()));
                    effects.push(RouteEffect::Instruction(instruction));
                }
                None => {
                    let text = payload.get("data").unwrap_or(&Value::Null).to_string();
                    debug!(%text, "direct feedback");
                    effects.push(RouteEffect::StatusText(text));
                }
            }
        }
        MessageKind::ProcessStateChanged => {
            let state = first_present(payload, &[&["process_state_name"]])
                .and_then(as_text)
                .unwrap_or_else(|| "unknown".to_string());
            info!(%state, "process state changed");
            effects.push(RouteEffect::StatusText(format!("State: {state}")));
        }
        MessageKind::Message => {
            let content = first_present(payload, &[&["content"]])
                .and_then(as_text)
                .unwrap_or_default();
            let complete = payload.get("message_complete").is_some_and(is_present);
            debug!(chars = content.len(), complete, "assistant message");
            let text = if complete { content } else { format!("{content}...") };
            effects.push(RouteEffect::StatusText(text));
        }
        MessageKind::Meta => {
            let content = first_present(payload, &[&["content"]])
                .and_then(as_text)
                .unwrap_or_default();
            info!(%content, "meta");
        }
        MessageKind::Error => {
            let text = first_present(payload, ERROR_TEXT_PATHS)
                .and_then(as_text)
                .unwrap_or_else(|| payload.to_string());
            error!(error = %text, payload = %payload, "server error");
            effects.push(RouteEffect::StatusText(format!("Error: {text}")));
        }
        MessageKind::Unknown(kind) => {
            debug!(?kind, payload = %payload, "unhandled message type");
        }
    }

    if known_process_id.is_none() {
        if let Some(process_id) = harvest_process_id(payload) {
            let fetch = RouteEffect::FetchCatalog(process_id.clone());
            effects.push(RouteEffect::ProcessId(process_id));
            if !effects.contains(&fetch) {
                effects.push(fetch);
            }
        }
    }

    if let Some(items) = first_non_empty_array(payload, MESSAGE_CATALOG_PATHS) {
        effects.push(RouteEffect::ReplaceCatalog(normalize_instructions(items)));
    }

    effects
}

pub fn harvest_process_id(payload: &Value) -> Option<String> {
    first_present(payload, PROCESS_ID_PATHS).and_then(as_text)
}

pub fn parse_detections(payload: &Value) -> Vec<DetectionPayload> {
    let Some(items) = first_present(payload, DETECTION_LIST_PATHS).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|det| DetectionPayload {
            label: first_present(det, DETECTION_LABEL_PATHS).and_then(as_text),
            confidence: det.get("confidence").and_then(Value::as_f64),
            vertices: extract_vertices(det),
            raw: det.clone(),
        })
        .collect()
}

/// Explicit vertex lists win; a bounding box is expanded clockwise from its
/// top-left corner.
pub fn extract_vertices(det: &Value) -> Vec<ScreenVertex> {
    if let Some(points) = first_non_empty_array(det, VERTEX_LIST_PATHS) {
        return points
            .iter()
            .map(|p| ScreenVertex::new(number_or_zero(p, "x"), number_or_zero(p, "y")))
            .collect();
    }

    let Some(bbox) = det.get("bounding_box").filter(|b| is_present(b)) else {
        return Vec::new();
    };
    let left = number_or_zero(bbox, "x");
    let top = number_or_zero(bbox, "y");
    let right = left + number_or_zero(bbox, "width");
    let bottom = top + number_or_zero(bbox, "height");
    vec![
        ScreenVertex::new(left, top),
        ScreenVertex::new(right, top),
        ScreenVertex::new(right, bottom),
        ScreenVertex::new(left, bottom),
    ]
}

pub fn extract_instruction(payload: &Value) -> Option<InstructionPayload> {
    let source = first_present(payload, FEEDBACK_INSTRUCTION_PATHS)?;

    if let Value::String(text) = source {
        return Some(InstructionPayload {
            index: 0,
            description: text.clone(),
            status: None,
            raw: payload.clone(),
        });
    }

    Some(InstructionPayload {
        index: first_present(source, &[&["index"], &["step_index"]])
            .and_then(as_index)
            .unwrap_or(0),
        description: first_present(source, &[&["text"], &["description"]])
            .and_then(as_text)
            .unwrap_or_else(|| source.to_string()),
        status: first_present(source, &[&["status"], &["state"]]).and_then(as_text),
        raw: source.clone(),
    })
}

/// Canonical form of a catalog array. Items already in canonical shape come
/// back unchanged.
pub fn normalize_instructions(items: &[Value]) -> Vec<InstructionPayload> {
    items
        .iter()
        .enumerate()
        .map(|(position, item)| InstructionPayload {
            index: first_defined(item, &[&["index"], &["step_index"]])
                .and_then(as_index)
                .unwrap_or(position as i64),
            description: first_defined(item, &[&["text"], &["description"]])
                .and_then(as_text)
                .unwrap_or_default(),
            status: first_defined(item, &[&["status"], &["state"]]).and_then(as_text),
            raw: item
                .as_object()
                .and_then(|obj| obj.get("raw"))
                .cloned()
                .unwrap_or_else(|| item.clone()),
        })
        .collect()
}

/// Catalog carried by a `GET /processes/{id}` response, if any.
pub fn catalog_from_process_response(payload: &Value) -> Option<Vec<InstructionPayload>> {
    first_non_empty_array(payload, FETCHED_CATALOG_PATHS).map(|items| normalize_instructions(items))
}

pub fn detection_summary(detections: &[DetectionPayload]) -> String {
    let mut text = String::from("Detected:\n");
    for (i, det) in detections.iter().enumerate() {
        let label = det.label.as_deref().unwrap_or("unknown");
        text.push_str(&format!("{}. {label}\n", i + 1));
    }
    text
}
