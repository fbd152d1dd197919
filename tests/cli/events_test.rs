//! Tests for stream message classification.

use aicli_bridge::cli::{classify_message, EventType};
use serde_json::json;

#[test]
fn system_init() {
    let message = classify_message(&json!({
        "type": "system",
        "subtype": "init",
        "session_id": "abc",
        "cwd": "/work",
        "tools": ["Read", "Bash"],
        "model": "claude"
    }));

    assert_eq!(message.event_type, EventType::SystemInit);
    assert_eq!(message.raw_type.as_deref(), Some("system"));
    assert_eq!(message.session_id(), Some("abc"));
    assert_eq!(message.data["workingDirectory"], "/work");
    assert_eq!(message.data["availableTools"], json!(["Read", "Bash"]));
    assert_eq!(message.data["mcpServers"], json!([]));
}

#[test]
fn assistant_with_content_blocks() {
    let message = classify_message(&json!({
        "type": "assistant",
        "message": {
            "id": "m1",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "name": "Read"},
                {"type": "text", "text": "World"}
            ]
        }
    }));

    assert_eq!(message.event_type, EventType::AssistantMessage);
    assert_eq!(message.data["messageId"], "m1");
    assert_eq!(message.text_content().as_deref(), Some("Hello\nWorld"));
}

#[test]
fn failed_tool_result() {
    let message = classify_message(&json!({
        "type": "tool_result",
        "tool_use_id": "t1",
        "is_error": true,
        "content": "no such file"
    }));

    assert_eq!(message.event_type, EventType::ToolResult);
    assert_eq!(message.data["success"], false);
    assert_eq!(message.data["error"], "no such file");
    assert!(message.data.get("result").is_none());
}

#[test]
fn result_prefers_total_cost() {
    let message = classify_message(&json!({
        "type": "result",
        "result": "done",
        "session_id": "abc",
        "duration_ms": 1200,
        "total_cost_usd": 0.02,
        "cost_usd": 0.01
    }));

    assert!(message.is_final_result());
    assert_eq!(message.data["cost"], 0.02);
    assert_eq!(message.data["duration"], 1200);
    assert_eq!(message.data["success"], true);
}

#[test]
fn unknown_and_non_object_values_pass_through() {
    let value = json!({"type": "user", "x": 1});
    let message = classify_message(&value);
    assert_eq!(message.event_type, EventType::StreamData);
    assert_eq!(message.data, value);

    let message = classify_message(&json!([1, 2]));
    assert_eq!(message.event_type, EventType::StreamData);
    assert!(message.raw_type.is_none());
}
