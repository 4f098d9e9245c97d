//! Self-hosted function-calling wire format (Ollama `/api/chat`).
//!
//! These models are less reliable at honoring the tool protocol, so the
//! adapter re-prompts on its own when a reply is empty or carries a tool
//! call without arguments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use copilot_core::config::BackendConfig;
use copilot_core::{ContentBlock, Message, Role, ToolCall};

use super::blocks::{new_call_id, normalize_arguments};
use super::{BackendInfo, ModelBackend, ModelReply, Sampling, Transport, TurnRequest, WireFormat};
use crate::error::ProviderError;
use crate::retry::{RetryController, RetryDecision, DEFAULT_RETRY_CEILING};

const EMPTY_REPLY_NUDGE: &str =
    "Your last reply was empty. Call the query_sql tool with a complete SQL query, or answer with the JSON envelope.";
const MISSING_ARGUMENTS_NUDGE: &str =
    "Your last tool call had no arguments. Call query_sql again with an \"sql\" argument containing a complete SELECT statement.";

pub struct FunctionCallBackend {
    transport: Arc<dyn Transport>,
    base_url: String,
    model: String,
    sampling: Sampling,
    retry_ceiling: u32,
}

impl FunctionCallBackend {
    pub fn from_config(config: &BackendConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
            sampling: Sampling::from_config(config),
            retry_ceiling: DEFAULT_RETRY_CEILING,
        }
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    async fn call(&self, request: &TurnRequest<'_>, extra: &[Message]) -> Result<ModelReply, ProviderError> {
        let body = self.body_with(request, extra);
        let response = self
            .transport
            .post_json(&format!("{}/api/chat", self.base_url), &body)
            .await?;
        self.parse_response(&response)
    }

    /// Request body with `extra` messages appended after the conversation.
    fn body_with(&self, request: &TurnRequest<'_>, extra: &[Message]) -> Value {
        let tool_names: HashMap<&str, &str> = request
            .messages
            .iter()
            .flat_map(|m| m.tool_calls())
            .map(|call| (call.id.as_str(), call.name.as_str()))
            .collect();

        let mut messages = vec![json!({"role": "system", "content": request.system})];
        for message in request.messages.iter().chain(extra) {
            messages.extend(message_to_wire(message, &tool_names));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.sampling.temperature_for(request.attempt),
                "num_predict": self.sampling.max_tokens,
            },
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

/// Why a reply needs another round.
fn unusable(reply: &ModelReply) -> Option<&'static str> {
    if reply.is_empty() {
        return Some(EMPTY_REPLY_NUDGE);
    }
    let missing_args = reply
        .tool_calls()
        .iter()
        .any(|call| call.input.as_object().map_or(true, |args| args.is_empty()));
    missing_args.then_some(MISSING_ARGUMENTS_NUDGE)
}

fn message_to_wire(message: &Message, tool_names: &HashMap<&str, &str>) -> Vec<Value> {
    let blocks = message.blocks();
    let text = message.text();
    match message.role {
        Role::Assistant => {
            let calls: Vec<Value> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse(call) => Some(json!({
                        "function": {"name": call.name, "arguments": call.input}
                    })),
                    _ => None,
                })
                .collect();
            let mut wire = json!({"role": "assistant", "content": text});
            if !calls.is_empty() {
                wire["tool_calls"] = Value::Array(calls);
            }
            vec![wire]
        }
        Role::User => {
            let mut wire: Vec<Value> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult(result) => Some(json!({
                        "role": "tool",
                        "content": result.payload.to_string(),
                        "tool_name": tool_names
                            .get(result.tool_use_id.as_str())
                            .copied()
                            .unwrap_or(copilot_sql::QUERY_SQL_TOOL),
                    })),
                    _ => None,
                })
                .collect();
            if !text.trim().is_empty() {
                wire.push(json!({"role": "user", "content": text}));
            }
            wire
        }
    }
}

impl WireFormat for FunctionCallBackend {
    fn format_request(&self, request: &TurnRequest<'_>) -> Value {
        self.body_with(request, &[])
    }

    /// Decode a `/api/chat` or OpenAI-style `choices` response. A plain string
    /// body becomes text.
    fn parse_response(&self, body: &Value) -> Result<ModelReply, ProviderError> {
        if let Value::String(text) = body {
            return Ok(ModelReply::from_text(text.clone()));
        }
        let message = body
            .get("message")
            .or_else(|| body.pointer("/choices/0/message"))
            .ok_or_else(|| ProviderError::InvalidResponse("missing message".into()))?;

        let mut reply = ModelReply::default();
        match message.get("content") {
            Some(Value::String(text)) if !text.trim().is_empty() => reply.blocks.push(ContentBlock::text(text.clone())),
            Some(value @ Value::Object(_)) => reply.structured = Some(value.clone()),
            _ => {}
        }
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let function = call.get("function").unwrap_or(call);
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(new_call_id);
                let name = function.get("name").and_then(Value::as_str).unwrap_or_default();
                let input = normalize_arguments(function.get("arguments"));
                reply.blocks.push(ContentBlock::ToolUse(ToolCall::new(id, name, input)));
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl ModelBackend for FunctionCallBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "function_call",
            model: self.model.clone(),
            region: None,
        }
    }

    async fn invoke(&self, request: &TurnRequest<'_>) -> Result<ModelReply, ProviderError> {
        let mut retry = RetryController::new(self.retry_ceiling);
        let mut extra: Vec<Message> = Vec::new();
        let mut turn = *request;
        loop {
            let reply = self.call(&turn, &extra).await?;
            let Some(nudge) = unusable(&reply) else {
                return Ok(reply);
            };
            match retry.record_failure(nudge) {
                RetryDecision::Retry { attempt } => {
                    debug!(attempt, model = %self.model, "Re-prompting function-call model");
                    let previous = reply.into_message();
                    if !previous.blocks().is_empty() {
                        extra.push(previous);
                    }
                    extra.push(Message::user(nudge));
                    turn.attempt = request.attempt + attempt;
                }
                RetryDecision::Exhausted => {
                    warn!(model = %self.model, retries = retry.retries(), "Function-call model never produced a usable reply");
                    return Ok(reply);
                }
            }
        }
    }
}
