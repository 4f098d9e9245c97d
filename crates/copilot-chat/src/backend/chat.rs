//! Chat (InvokeModel) wire format.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use copilot_core::config::BackendConfig;
use copilot_core::ContentBlock;

use super::blocks::{merge_consecutive, parse_content_blocks};
use super::{encode_model_id, BackendInfo, ModelBackend, ModelReply, Sampling, Transport, TurnRequest, WireFormat};
use crate::error::ProviderError;

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Tries each candidate model id in order; the first success wins.
pub struct ChatBackend {
    transport: Arc<dyn Transport>,
    endpoint: String,
    model_ids: Vec<String>,
    region: String,
    sampling: Sampling,
}

impl ChatBackend {
    pub fn from_config(config: &BackendConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_models(config, transport, vec![config.model_id.clone()])
    }

    /// The configured model followed by the configured fallbacks.
    pub fn with_fallbacks(config: &BackendConfig, transport: Arc<dyn Transport>) -> Self {
        let mut model_ids = vec![config.model_id.clone()];
        for id in &config.fallback_model_ids {
            if !model_ids.contains(id) {
                model_ids.push(id.clone());
            }
        }
        Self::with_models(config, transport, model_ids)
    }

    fn with_models(config: &BackendConfig, transport: Arc<dyn Transport>, model_ids: Vec<String>) -> Self {
        Self {
            transport,
            endpoint: config.runtime_endpoint(),
            model_ids,
            region: config.region.clone(),
            sampling: Sampling::from_config(config),
        }
    }

    pub fn model_ids(&self) -> &[String] {
        &self.model_ids
    }
}

impl WireFormat for ChatBackend {
    fn format_request(&self, request: &TurnRequest<'_>) -> Value {
        chat_body(request, &self.sampling)
    }

    fn parse_response(&self, body: &Value) -> Result<ModelReply, ProviderError> {
        let content = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("missing content".into()))?;
        Ok(ModelReply::from_blocks(parse_content_blocks(content)))
    }
}

fn chat_body(request: &TurnRequest<'_>, sampling: &Sampling) -> Value {
    let messages: Vec<Value> = merge_consecutive(request.messages)
        .into_iter()
        .map(|(role, blocks)| {
            json!({
                "role": role.to_string(),
                "content": blocks.iter().map(block_to_wire).collect::<Vec<_>>(),
            })
        })
        .collect();

    let mut body = json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": sampling.max_tokens,
        "temperature": sampling.temperature_for(request.attempt),
        "system": request.system,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::ToolUse(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input,
        }),
        ContentBlock::ToolResult(result) => json!({
            "type": "tool_result",
            "tool_use_id": result.tool_use_id,
            "content": result.payload.to_string(),
            "is_error": result.is_error(),
        }),
    }
}

#[async_trait]
impl ModelBackend for ChatBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "chat",
            model: self.model_ids.first().cloned().unwrap_or_default(),
            region: Some(self.region.clone()),
        }
    }

    async fn invoke(&self, request: &TurnRequest<'_>) -> Result<ModelReply, ProviderError> {
        let body = self.format_request(request);
        let mut first_error = None;
        for model_id in &self.model_ids {
            let url = format!("{}/model/{}/invoke", self.endpoint, encode_model_id(model_id));
            let result = match self.transport.post_json(&url, &body).await {
                Ok(response) => self.parse_response(&response),
                Err(e) => Err(e),
            };
            match result {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    debug!(model = %model_id, error = %e, "Chat invocation failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| ProviderError::InvalidResponse("no model ids configured".into())))
    }
}
