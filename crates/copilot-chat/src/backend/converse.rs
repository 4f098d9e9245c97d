//! Converse wire format, with a Chat API fallback for validation failures.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use copilot_core::config::BackendConfig;
use copilot_core::{ContentBlock, ToolStatus};

use super::blocks::{merge_consecutive, parse_content_blocks};
use super::{
    encode_model_id, BackendInfo, ChatBackend, ModelBackend, ModelReply, Sampling, Transport, TurnRequest, WireFormat,
};
use crate::error::ProviderError;

pub struct ConverseBackend {
    transport: Arc<dyn Transport>,
    endpoint: String,
    model_id: String,
    region: String,
    sampling: Sampling,
    fallback: ChatBackend,
}

impl ConverseBackend {
    pub fn from_config(config: &BackendConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            fallback: ChatBackend::with_fallbacks(config, transport.clone()),
            transport,
            endpoint: config.runtime_endpoint(),
            model_id: config.model_id.clone(),
            region: config.region.clone(),
            sampling: Sampling::from_config(config),
        }
    }

    fn url(&self) -> String {
        format!("{}/model/{}/converse", self.endpoint, encode_model_id(&self.model_id))
    }
}

impl WireFormat for ConverseBackend {
    fn format_request(&self, request: &TurnRequest<'_>) -> Value {
        converse_body(request, &self.sampling)
    }

    fn parse_response(&self, body: &Value) -> Result<ModelReply, ProviderError> {
        let content = body
            .pointer("/output/message/content")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("missing output.message.content".into()))?;
        Ok(ModelReply::from_blocks(parse_content_blocks(content)))
    }
}

fn converse_body(request: &TurnRequest<'_>, sampling: &Sampling) -> Value {
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
        "system": [{"text": request.system}],
        "messages": messages,
        "inferenceConfig": {
            "maxTokens": sampling.max_tokens,
            "temperature": sampling.temperature_for(request.attempt),
        },
    });
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "toolSpec": {
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": {"json": tool.input_schema},
                    }
                })
            })
            .collect();
        body["toolConfig"] = json!({ "tools": tools });
    }
    body
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "text": text }),
        ContentBlock::ToolUse(call) => json!({
            "toolUse": {"toolUseId": call.id, "name": call.name, "input": call.input}
        }),
        ContentBlock::ToolResult(result) => json!({
            "toolResult": {
                "toolUseId": result.tool_use_id,
                "status": match result.status {
                    ToolStatus::Success => "success",
                    ToolStatus::Error => "error",
                },
                "content": [{"json": result.payload}],
            }
        }),
    }
}

#[async_trait]
impl ModelBackend for ConverseBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "converse",
            model: self.model_id.clone(),
            region: Some(self.region.clone()),
        }
    }

    async fn invoke(&self, request: &TurnRequest<'_>) -> Result<ModelReply, ProviderError> {
        let body = self.format_request(request);
        debug!(model = %self.model_id, messages = request.messages.len(), "Invoking Converse");
        let result = match self.transport.post_json(&self.url(), &body).await {
            Ok(response) => self.parse_response(&response),
            Err(e) => Err(e),
        };

        match result {
            Err(err) if err.is_validation_class() && !err.is_model_identity() => {
                warn!(error = %err, "Converse rejected the request, trying the Chat API");
                match self.fallback.invoke(request).await {
                    Ok(reply) => Ok(reply),
                    Err(fallback_err) => {
                        warn!(error = %fallback_err, "Chat API fallback failed");
                        Err(err)
                    }
                }
            }
            other => other,
        }
    }
}
