//! Classification of stream-json messages into application events.
//!
//! Claude Code emits a loosely-typed stream of JSON objects when running
//! with `--output-format stream-json`. Everything downstream works with
//! [`ParsedMessage`], which pairs the raw `type` field with an
//! [`EventType`] and a normalized payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of application event a stream message maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    /// Anything without a more specific classification.
    StreamData,
    /// `system` message with `subtype: init`.
    SystemInit,
    /// Assistant message carrying structured content blocks.
    AssistantMessage,
    /// Tool invocation request.
    ToolUse,
    /// Tool execution result.
    ToolResult,
    /// Terminal `result` message of a conversation turn.
    ConversationResult,
}

/// A classified stream message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    /// Value of the message's `type` field, if it had one.
    pub raw_type: Option<String>,
    /// Classified event kind.
    pub event_type: EventType,
    /// Normalized payload; shape depends on `event_type`.
    pub data: Value,
}

impl ParsedMessage {
    /// Session id carried by `SystemInit` and `ConversationResult` payloads.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self.event_type {
            EventType::SystemInit | EventType::ConversationResult => {
                self.data.get("sessionId").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Returns true if this is the terminal result of a conversation turn.
    #[must_use]
    pub fn is_final_result(&self) -> bool {
        self.event_type == EventType::ConversationResult
    }

    /// Human-readable text carried by the message, used for prompt detection.
    ///
    /// Joins the `text` blocks of an assistant response; falls back to the
    /// `content` string of plain assistant/system messages and to the raw
    /// string for passthrough data.
    #[must_use]
    pub fn text_content(&self) -> Option<String> {
        match &self.data {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => match map.get("content") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(blocks)) => {
                    let text: Vec<&str> = blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect();
                    if text.is_empty() {
                        None
                    } else {
                        Some(text.join("\n"))
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn field(message: &Value, key: &str) -> Value {
    message.get(key).cloned().unwrap_or(Value::Null)
}

fn is_error(message: &Value) -> bool {
    message
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Classify a single stream message.
///
/// Total over every JSON value: anything unrecognized becomes
/// [`EventType::StreamData`] with the input passed through.
#[must_use]
pub fn classify_message(message: &Value) -> ParsedMessage {
    let Some(obj) = message.as_object() else {
        return ParsedMessage {
            raw_type: None,
            event_type: EventType::StreamData,
            data: message.clone(),
        };
    };

    let raw_type = obj.get("type").and_then(Value::as_str).map(str::to_string);

    let (event_type, data) = match raw_type.as_deref() {
        Some("system") if obj.get("subtype").and_then(Value::as_str) == Some("init") => (
            EventType::SystemInit,
            json!({
                "type": "system_init",
                "sessionId": field(message, "session_id"),
                "workingDirectory": field(message, "cwd"),
                "availableTools": obj.get("tools").cloned().unwrap_or_else(|| json!([])),
                "mcpServers": obj.get("mcp_servers").cloned().unwrap_or_else(|| json!([])),
                "model": field(message, "model"),
            }),
        ),
        Some("system") => (
            EventType::StreamData,
            json!({ "type": "system", "content": message.clone() }),
        ),
        Some("assistant") => classify_assistant(message),
        Some("tool_use") => (
            EventType::ToolUse,
            json!({
                "type": "tool_use",
                "toolName": field(message, "name"),
                "toolInput": field(message, "input"),
                "toolId": field(message, "id"),
            }),
        ),
        Some("tool_result") => {
            let failed = is_error(message);
            let mut data = json!({
                "type": "tool_result",
                "toolName": field(message, "name"),
                "toolId": field(message, "tool_use_id"),
                "success": !failed,
            });
            let key = if failed { "error" } else { "result" };
            data[key] = field(message, "content");
            (EventType::ToolResult, data)
        }
        Some("result") => (
            EventType::ConversationResult,
            json!({
                "type": "final_result",
                "success": !is_error(message),
                "result": field(message, "result"),
                "sessionId": field(message, "session_id"),
                "duration": field(message, "duration_ms"),
                "cost": obj
                    .get("total_cost_usd")
                    .or_else(|| obj.get("cost_usd"))
                    .cloned()
                    .unwrap_or(Value::Null),
                "usage": field(message, "usage"),
            }),
        ),
        _ => (EventType::StreamData, message.clone()),
    };

    ParsedMessage {
        raw_type,
        event_type,
        data,
    }
}

fn classify_assistant(message: &Value) -> (EventType, Value) {
    let inner = message.get("message");
    let content = inner.and_then(|m| m.get("content"));

    if let (Some(inner), Some(Value::Array(blocks))) = (inner, content) {
        return (
            EventType::AssistantMessage,
            json!({
                "type": "assistant_response",
                "messageId": field(inner, "id"),
                "content": blocks,
                "model": field(inner, "model"),
                "usage": field(inner, "usage"),
            }),
        );
    }

    let content = content
        .cloned()
        .or_else(|| message.get("content").cloned())
        .unwrap_or(Value::Null);
    (
        EventType::StreamData,
        json!({ "type": "assistant", "content": content }),
    )
}
