use serde_json::Value;

pub type FieldPath = &'static [&'static str];

pub const DETECTION_LIST_PATHS: &[FieldPath] =
    &[&["objects"], &["detections"], &["frame_feedback", "detections"]];

pub const DETECTION_LABEL_PATHS: &[FieldPath] = &[&["label"], &["classification"]];

pub const VERTEX_LIST_PATHS: &[FieldPath] = &[&["screen_vertices"], &["vertices"]];

pub const FEEDBACK_INSTRUCTION_PATHS: &[FieldPath] =
    &[&["data"], &["current_instruction"], &["instruction"]];

pub const PROCESS_ID_PATHS: &[FieldPath] = &[
    &["process_id"],
    &["processId"],
    &["process", "id"],
    &["session", "process_id"],
    &["session", "id"],
];

pub const MESSAGE_CATALOG_PATHS: &[FieldPath] = &[
    &["instructions"],
    &["current_instructions"],
    &["process", "instructions"],
    &["session", "instructions"],
];

pub const FETCHED_CATALOG_PATHS: &[FieldPath] = &[
    &["instructions"],
    &["process", "instructions"],
    &["data", "instructions"],
];

pub const ERROR_TEXT_PATHS: &[FieldPath] = &[&["message"], &["error"], &["content"]];

pub fn lookup<'a>(value: &'a Value, path: FieldPath) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Present means something a sender would have meant to set: not null, not
/// `false`, not `0`, not an empty string.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn first_present<'a>(value: &'a Value, paths: &[FieldPath]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find(|v| is_present(v))
}

/// Like [`first_present`] but only null/missing is skipped, so `0` and `""`
/// are accepted.
pub fn first_defined<'a>(value: &'a Value, paths: &[FieldPath]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find(|v| !v.is_null())
}

pub fn first_non_empty_array<'a>(value: &'a Value, paths: &[FieldPath]) -> Option<&'a Vec<Value>> {
    first_present(value, paths)
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
}

pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn number_or_zero(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}
