use ramblr_protocol::{InstructionPayload, ScreenVertex};
use ramblr_stream::router::{
    catalog_from_process_response, extract_instruction, normalize_instructions, route,
    RouteEffect, STATUS_NO_PROCESS, STATUS_PROCESS_ACTIVE,
};
use serde_json::json;

#[test]
fn bounding_box_becomes_four_clockwise_vertices() {
    let raw = json!({
        "type": "frame_detection",
        "objects": [{"label": "wrench", "bounding_box": {"x": 1, "y": 2, "width": 3, "height": 4}}]
    })
    .to_string();

    let effects = route(&raw, Some("p-1"));
    let detections = effects
        .iter()
        .find_map(|e| match e {
            RouteEffect::Detections(d) => Some(d.clone()),
            _ => None,
        })
        .expect("detections effect");

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label.as_deref(), Some("wrench"));
    assert_eq!(
        detections[0].vertices,
        vec![
            ScreenVertex::new(1.0, 2.0),
            ScreenVertex::new(4.0, 2.0),
            ScreenVertex::new(4.0, 6.0),
            ScreenVertex::new(1.0, 6.0),
        ]
    );
    assert!(effects.contains(&RouteEffect::StatusText("Detected:\n1. wrench\n".to_string())));
}

#[test]
fn detection_fields_fall_back_in_order() {
    let raw = json!({
        "type": "frame_detection",
        "detections": [
            {"classification": "bolt", "confidence": 0.9, "vertices": [{"x": 5, "y": 6}]},
            {"vertices": [{"x": 1}]},
        ]
    })
    .to_string();
    let effects = route(&raw, Some("p-1"));
    let RouteEffect::Detections(detections) = &effects[1] else {
        panic!("expected detections after summary, got {effects:?}");
    };
    assert_eq!(detections[0].label.as_deref(), Some("bolt"));
    assert_eq!(detections[0].confidence, Some(0.9));
    assert_eq!(detections[0].vertices, vec![ScreenVertex::new(5.0, 6.0)]);
    assert_eq!(detections[1].label, None);
    assert_eq!(detections[1].vertices, vec![ScreenVertex::new(1.0, 0.0)]);

    let nested = json!({"type": "frame_detection", "frame_feedback": {"detections": [{"label": "nut"}]}});
    let effects = route(&nested.to_string(), Some("p-1"));
    assert!(matches!(&effects[1], RouteEffect::Detections(d) if d[0].vertices.is_empty()));
}

#[test]
fn empty_detection_frame_still_replaces_the_snapshot() {
    let effects = route(r#"{"type":"frame_detection","objects":[]}"#, Some("p-1"));
    assert_eq!(effects, vec![RouteEffect::Detections(Vec::new())]);
}

#[test]
fn session_init_with_process_starts_catalog_fetch() {
    let raw = json!({
        "type": "session_init",
        "process_id": "p-7",
        "current_process_state": {"state_name": "assembling"}
    })
    .to_string();
    let effects = route(&raw, None);
    assert_eq!(
        effects,
        vec![
            RouteEffect::StatusText(STATUS_PROCESS_ACTIVE.to_string()),
            RouteEffect::FetchCatalog("p-7".to_string()),
            RouteEffect::ProcessId("p-7".to_string()),
        ]
    );

    let effects = route(&raw, Some("p-7"));
    assert_eq!(
        effects,
        vec![
            RouteEffect::StatusText(STATUS_PROCESS_ACTIVE.to_string()),
            RouteEffect::FetchCatalog("p-7".to_string()),
        ]
    );
}

#[test]
fn session_init_without_process() {
    let effects = route(r#"{"type":"session_init","process_id":null}"#, None);
    assert_eq!(
        effects,
        vec![RouteEffect::StatusText(STATUS_NO_PROCESS.to_string())]
    );
}

#[test]
fn process_id_is_harvested_from_any_message() {
    let effects = route(r#"{"type":"meta","session":{"id":42}}"#, None);
    assert_eq!(
        effects,
        vec![
            RouteEffect::ProcessId("42".to_string()),
            RouteEffect::FetchCatalog("42".to_string()),
        ]
    );
    assert!(route(r#"{"type":"meta","processId":"p"}"#, Some("p")).is_empty());
}

#[test]
fn feedback_with_string_instruction() {
    let effects = route(
        r#"{"type":"session_feedback","data":"Tighten the bolt"}"#,
        Some("p"),
    );
    let RouteEffect::Instruction(instruction) = &effects[1] else {
        panic!("expected instruction, got {effects:?}");
    };
    assert_eq!(instruction.index, 0);
    assert_eq!(instruction.description, "Tighten the bolt");
    assert_eq!(
        effects[0],
        RouteEffect::StatusText("Tighten the bolt".to_string())
    );
}

#[test]
fn feedback_with_structured_instruction() {
    let payload = json!({
        "type": "session_feedback",
        "current_instruction": {"step_index": 9, "description": "Attach panel", "state": "active", "id": "i-9"}
    });
    let instruction = extract_instruction(&payload).unwrap();
    assert_eq!(instruction.index, 9);
    assert_eq!(instruction.description, "Attach panel");
    assert_eq!(instruction.status.as_deref(), Some("active"));
    assert_eq!(instruction.raw_id(), Some(&json!("i-9")));
}

#[test]
fn feedback_without_instruction_shows_data() {
    let effects = route(r#"{"type":"session_feedback","data":{"hint":1}}"#, Some("p"));
    assert_eq!(
        effects[0],
        RouteEffect::StatusText(r#"{"hint":1}"#.to_string())
    );
    assert!(matches!(&effects[1], RouteEffect::Instruction(i) if i.description == r#"{"hint":1}"#));

    let effects = route(r#"{"type":"session_feedback"}"#, Some("p"));
    assert_eq!(effects, vec![RouteEffect::StatusText("null".to_string())]);
}

#[test]
fn state_message_and_error_texts() {
    assert_eq!(
        route(
            r#"{"type":"session_process_state_changed","process_state_name":"done"}"#,
            Some("p")
        ),
        vec![RouteEffect::StatusText("State: done".to_string())]
    );
    assert_eq!(
        route(r#"{"type":"session_process_state_changed"}"#, Some("p")),
        vec![RouteEffect::StatusText("State: unknown".to_string())]
    );
    assert_eq!(
        route(r#"{"type":"message","content":"Hel"}"#, Some("p")),
        vec![RouteEffect::StatusText("Hel...".to_string())]
    );
    assert_eq!(
        route(
            r#"{"type":"message","content":"Hello","message_complete":true}"#,
            Some("p")
        ),
        vec![RouteEffect::StatusText("Hello".to_string())]
    );
    assert_eq!(
        route(r#"{"type":"error","error":"quota"}"#, Some("p")),
        vec![RouteEffect::StatusText("Error: quota".to_string())]
    );
}

#[test]
fn malformed_and_unknown_messages_produce_nothing() {
    assert!(route("{not json", None).is_empty());
    assert!(route("", None).is_empty());
    assert!(route(r#"{"type":"telemetry"}"#, Some("p")).is_empty());
}

#[test]
fn catalog_in_message_replaces_catalog() {
    let raw = json!({
        "type": "meta",
        "process": {"id": "p-2", "instructions": [
            {"step_index": 1, "text": "Second"},
            {"index": 0, "description": "First", "status": "done"},
        ]}
    })
    .to_string();
    let effects = route(&raw, None);
    assert_eq!(effects[0], RouteEffect::ProcessId("p-2".to_string()));
    let RouteEffect::ReplaceCatalog(catalog) = &effects[2] else {
        panic!("expected catalog, got {effects:?}");
    };
    assert_eq!(catalog[0].index, 1);
    assert_eq!(catalog[0].description, "Second");
    assert_eq!(catalog[1].status.as_deref(), Some("done"));
}

#[test]
fn normalization_uses_position_and_keeps_canonical_items() {
    let items = vec![json!({"text": "a"}), json!({"description": "b"}), json!({})];
    let normalized = normalize_instructions(&items);
    assert_eq!(
        normalized.iter().map(|i| i.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(normalized[2].description, "");
    assert_eq!(normalized[0].raw, json!({"text": "a"}));

    let canonical = vec![InstructionPayload {
        index: 4,
        description: "Mount".to_string(),
        status: Some("active".to_string()),
        raw: json!({"id": "i-4"}),
    }];
    let as_json: Vec<_> = canonical
        .iter()
        .map(|i| serde_json::to_value(i).unwrap())
        .collect();
    assert_eq!(normalize_instructions(&as_json), canonical);
}

#[test]
fn fetched_process_catalog_paths() {
    let body = json!({"data": {"instructions": [{"index": 3, "text": "Check"}]}});
    let catalog = catalog_from_process_response(&body).unwrap();
    assert_eq!(catalog[0].index, 3);
    assert!(catalog_from_process_response(&json!({"instructions": []})).is_none());
}
