//! Model backends.
//!
//! Each adapter translates the canonical conversation into its provider's
//! wire format and decodes the reply back into content blocks. `Backend`
//! picks one from configuration.

pub mod blocks;
pub mod chat;
pub mod converse;
pub mod demo;
pub mod function_call;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use copilot_core::config::{BackendConfig, BackendKind};
use copilot_core::error::CopilotError;
use copilot_core::{ContentBlock, Message, ToolCall, ToolSpec};

use crate::envelope::RawOutput;
use crate::error::ProviderError;

pub use chat::ChatBackend;
pub use converse::ConverseBackend;
pub use demo::DemoBackend;
pub use function_call::FunctionCallBackend;
pub use transport::{HttpTransport, Transport};

/// One model invocation: the full conversation so far.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    /// Zero on the first call of a conversation.
    pub attempt: u32,
}

/// Decoded model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub blocks: Vec<ContentBlock>,
    /// Set when the provider returned a JSON object instead of text.
    pub structured: Option<Value>,
}

impl ModelReply {
    pub fn from_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            blocks,
            structured: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_blocks(vec![ContentBlock::text(text)])
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.structured.is_none() && self.tool_calls().is_empty() && self.text().trim().is_empty()
    }

    pub fn raw_output(&self) -> RawOutput {
        match &self.structured {
            Some(value) => RawOutput::Structured(value.clone()),
            None => RawOutput::Text(self.text()),
        }
    }

    /// The reply as an assistant message for the conversation history.
    pub fn into_message(self) -> Message {
        let mut blocks = self.blocks;
        if let Some(value) = self.structured {
            blocks.push(ContentBlock::text(value.to_string()));
        }
        Message::assistant_blocks(blocks)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub name: &'static str,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Generation parameters; retries run cooler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub max_tokens: u32,
    pub temperature: f32,
    pub retry_temperature: f32,
}

impl Sampling {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry_temperature: config.retry_temperature,
        }
    }

    pub fn temperature_for(&self, attempt: u32) -> f32 {
        if attempt == 0 {
            self.temperature
        } else {
            self.retry_temperature
        }
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn info(&self) -> BackendInfo;

    async fn invoke(&self, request: &TurnRequest<'_>) -> Result<ModelReply, ProviderError>;
}

/// Request encoding and response decoding for one remote provider API.
///
/// Implemented by the HTTP adapters; `invoke` is transport plus these two.
pub trait WireFormat {
    /// Canonical turn to the provider's JSON request body.
    fn format_request(&self, request: &TurnRequest<'_>) -> Value;

    /// Provider response body back to canonical content blocks.
    fn parse_response(&self, body: &Value) -> Result<ModelReply, ProviderError>;
}

/// Configured backend.
pub enum Backend {
    Converse(ConverseBackend),
    Chat(ChatBackend),
    FunctionCall(FunctionCallBackend),
    Demo(DemoBackend),
}

impl Backend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, CopilotError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let backend = match config.kind {
            BackendKind::Converse => {
                let transport = Arc::new(HttpTransport::new(timeout, config.api_key.clone())?);
                Self::Converse(ConverseBackend::from_config(config, transport))
            }
            BackendKind::Chat => {
                let transport = Arc::new(HttpTransport::new(timeout, config.api_key.clone())?);
                Self::Chat(ChatBackend::from_config(config, transport))
            }
            BackendKind::FunctionCall => {
                let transport = Arc::new(HttpTransport::new(timeout, None)?);
                Self::FunctionCall(FunctionCallBackend::from_config(config, transport))
            }
            BackendKind::Demo => Self::Demo(DemoBackend::new()),
        };
        Ok(backend)
    }
}

#[async_trait]
impl ModelBackend for Backend {
    fn info(&self) -> BackendInfo {
        match self {
            Self::Converse(b) => b.info(),
            Self::Chat(b) => b.info(),
            Self::FunctionCall(b) => b.info(),
            Self::Demo(b) => b.info(),
        }
    }

    async fn invoke(&self, request: &TurnRequest<'_>) -> Result<ModelReply, ProviderError> {
        match self {
            Self::Converse(b) => b.invoke(request).await,
            Self::Chat(b) => b.invoke(request).await,
            Self::FunctionCall(b) => b.invoke(request).await,
            Self::Demo(b) => b.invoke(request).await,
        }
    }
}

/// Model ids are path segments in runtime URLs.
pub(crate) fn encode_model_id(model_id: &str) -> String {
    model_id.replace(':', "%3A").replace('/', "%2F")
}
