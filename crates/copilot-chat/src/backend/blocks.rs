//! Content-block decoding shared by the wire formats.

use serde_json::{Map, Value};
use uuid::Uuid;

use copilot_core::{ContentBlock, Message, Role, ToolCall};

/// Decode provider content blocks in either the `{"toolUse": {...}}` or the
/// `{"type": "tool_use", ...}` shape. Unknown blocks are skipped.
pub fn parse_content_blocks(items: &[Value]) -> Vec<ContentBlock> {
    items.iter().filter_map(parse_block).collect()
}

fn parse_block(item: &Value) -> Option<ContentBlock> {
    if let Some(tool_use) = item.get("toolUse") {
        return Some(ContentBlock::ToolUse(tool_call(
            tool_use.get("toolUseId"),
            tool_use.get("name"),
            tool_use.get("input"),
        )));
    }
    match item.get("type").and_then(Value::as_str) {
        Some("tool_use") => Some(ContentBlock::ToolUse(tool_call(
            item.get("id"),
            item.get("name"),
            item.get("input"),
        ))),
        Some("text") | None => item
            .get("text")
            .and_then(Value::as_str)
            .map(ContentBlock::text),
        Some(_) => None,
    }
}

fn tool_call(id: Option<&Value>, name: Option<&Value>, input: Option<&Value>) -> ToolCall {
    let id = id
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_call_id);
    let name = name.and_then(Value::as_str).unwrap_or_default();
    ToolCall::new(id, name, normalize_arguments(input))
}

pub fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Tool arguments as a mapping. JSON-encoded strings are decoded; anything
/// else becomes an empty mapping.
pub fn normalize_arguments(input: Option<&Value>) -> Value {
    match input {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Map::new()),
        },
        _ => Value::Object(Map::new()),
    }
}

/// Merge consecutive same-role messages into one block list. Empty text
/// blocks are dropped.
pub fn merge_consecutive(messages: &[Message]) -> Vec<(Role, Vec<ContentBlock>)> {
    let mut merged: Vec<(Role, Vec<ContentBlock>)> = Vec::new();
    for message in messages {
        let blocks: Vec<ContentBlock> = message
            .blocks()
            .into_iter()
            .filter(|b| !matches!(b, ContentBlock::Text { text } if text.trim().is_empty()))
            .collect();
        if blocks.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some((role, existing)) if *role == message.role => existing.extend(blocks),
            _ => merged.push((message.role, blocks)),
        }
    }
    merged
}
