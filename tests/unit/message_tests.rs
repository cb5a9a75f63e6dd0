//! Unit tests for push-channel envelope parsing.

use serde_json::json;

use rag_monitor::models::message::{
    decode_task_records, parse_channel_message, ChannelMessage, ClientMessage,
};
use rag_monitor::models::task::TaskState;
use rag_monitor::AppError;

fn updates(message: Option<ChannelMessage>) -> Vec<rag_monitor::models::task::TaskUpdate> {
    match message {
        Some(ChannelMessage::StatusUpdate(updates)) => updates,
        other => panic!("expected status update, got {other:?}"),
    }
}

// ── Recognized envelopes ─────────────────────────────────────

#[test]
fn status_update_with_single_record() {
    let frame = json!({
        "type": "status_update",
        "data": { "task_id": "repo_123", "status": "in_progress", "overall_progress": 40 }
    })
    .to_string();

    let records = updates(parse_channel_message(&frame).expect("parses"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_id, "repo_123");
    assert_eq!(records[0].status, Some(TaskState::InProgress));
    assert_eq!(records[0].overall_progress, Some(40.0));
}

#[test]
fn task_status_with_task_list() {
    let frame = json!({
        "type": "task_status",
        "data": { "active_tasks": [
            { "task_id": "a", "status": "queued" },
            { "task_id": "b", "status": "completed" }
        ]}
    })
    .to_string();

    let records = updates(parse_channel_message(&frame).expect("parses"));
    let ids: Vec<&str> = records.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn connection_info_keeps_payload() {
    let frame = json!({ "type": "connection_info", "data": { "client_id": "c-1" } }).to_string();
    let message = parse_channel_message(&frame).expect("parses");
    assert_eq!(
        message,
        Some(ChannelMessage::ConnectionInfo(json!({ "client_id": "c-1" })))
    );
}

#[test]
fn error_message_from_top_level_or_data() {
    let top = json!({ "type": "error", "message": "rate limited" }).to_string();
    let nested = json!({ "type": "error", "data": { "message": "bad subscribe" } }).to_string();
    let bare = json!({ "type": "error" }).to_string();

    assert_eq!(
        parse_channel_message(&top).expect("parses"),
        Some(ChannelMessage::Error("rate limited".into()))
    );
    assert_eq!(
        parse_channel_message(&nested).expect("parses"),
        Some(ChannelMessage::Error("bad subscribe".into()))
    );
    assert!(matches!(
        parse_channel_message(&bare).expect("parses"),
        Some(ChannelMessage::Error(_))
    ));
}

// ── Skipped and rejected frames ──────────────────────────────

#[test]
fn unknown_type_is_skipped() {
    let frame = json!({ "type": "heartbeat", "data": {} }).to_string();
    assert_eq!(parse_channel_message(&frame).expect("parses"), None);
}

#[test]
fn blank_frame_is_skipped() {
    assert_eq!(parse_channel_message("   ").expect("parses"), None);
}

#[test]
fn invalid_json_is_payload_error() {
    let err = parse_channel_message("{not json").unwrap_err();
    assert!(matches!(err, AppError::Payload(_)));
}

#[test]
fn missing_type_is_payload_error() {
    let err = parse_channel_message(r#"{"data": {}}"#).unwrap_err();
    assert!(matches!(err, AppError::Payload(_)));
}

#[test]
fn status_update_without_data_is_payload_error() {
    let err = parse_channel_message(r#"{"type": "status_update"}"#).unwrap_err();
    assert!(matches!(err, AppError::Payload(_)));
}

#[test]
fn lone_malformed_record_is_payload_error() {
    let frame = json!({ "type": "status_update", "data": { "status": "completed" } }).to_string();
    let err = parse_channel_message(&frame).unwrap_err();
    assert!(matches!(err, AppError::Payload(_)));
}

// ── Record collections ───────────────────────────────────────

#[test]
fn malformed_records_inside_a_list_are_dropped() {
    let records = decode_task_records(json!([
        { "task_id": "ok_1" },
        { "status": "completed" },
        "garbage",
        { "task_id": "ok_2", "overall_progress": 12 }
    ]))
    .expect("decodes");

    let ids: Vec<&str> = records.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(ids, vec!["ok_1", "ok_2"]);
}

#[test]
fn tasks_wrapper_is_accepted() {
    let records = decode_task_records(json!({ "tasks": [{ "task_id": "x" }] })).expect("decodes");
    assert_eq!(records.len(), 1);
}

#[test]
fn scalar_is_rejected() {
    let err = decode_task_records(json!(42)).unwrap_err();
    assert!(err.to_string().contains("number"));
}

// ── Outbound messages ────────────────────────────────────────

#[test]
fn subscribe_serializes_with_type_tag() {
    let json = ClientMessage::SubscribeTask {
        task_id: "repo_123".into(),
    }
    .to_json()
    .expect("serializes");

    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value, json!({ "type": "subscribe_task", "task_id": "repo_123" }));
}
