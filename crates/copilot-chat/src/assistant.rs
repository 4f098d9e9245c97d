//! Request-level analytics assistant.
//!
//! Wraps the driver for one chat request: validates the message, runs the
//! conversation, then re-checks and executes the final SQL so the caller
//! gets rows and a schema alongside the answer.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use copilot_core::config::CopilotConfig;
use copilot_core::{ChatPayload, ChatRequest, Message, ToolSpec};
use copilot_sql::{query_sql_spec, SqlDecision, SqlToolGate, ToolError};
use copilot_storage::Repository;

use crate::backend::{Backend, BackendInfo, ModelBackend};
use crate::driver::{ConversationDriver, DriverConfig};
use crate::error::ChatError;
use crate::prompt::{enhance_user_message, load_system_prompt, reconcile_dimensions};

pub const MAX_MESSAGE_CHARS: usize = 4000;
const MAX_DB_ERROR_CHARS: usize = 300;

pub struct AnalyticsAssistant {
    backend: Arc<dyn ModelBackend>,
    gate: Arc<SqlToolGate>,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    driver_config: DriverConfig,
}

impl AnalyticsAssistant {
    pub fn new(backend: Arc<dyn ModelBackend>, gate: Arc<SqlToolGate>, system_prompt: impl Into<String>) -> Self {
        let tools = vec![query_sql_spec(gate.validator().table())];
        Self {
            backend,
            gate,
            system_prompt: system_prompt.into(),
            tools,
            driver_config: DriverConfig::default(),
        }
    }

    /// Build the backend, gate and prompt from configuration.
    pub fn from_config(config: &CopilotConfig, repo: Arc<dyn Repository>) -> Result<Self, ChatError> {
        let backend = Backend::from_config(&config.backend)?;
        let gate = SqlToolGate::from_config(repo, &config.tools, config.database.dialect);
        let prompt = load_system_prompt(config.general.system_prompt_path.as_deref().map(Path::new));
        Ok(Self::new(Arc::new(backend), Arc::new(gate), prompt)
            .with_driver_config(DriverConfig::from_config(config)))
    }

    pub fn with_driver_config(mut self, config: DriverConfig) -> Self {
        self.driver_config = config;
        self
    }

    pub fn backend_info(&self) -> BackendInfo {
        self.backend.info()
    }

    /// Answer one chat request.
    ///
    /// Only an empty or over-long message is an error; every later failure
    /// becomes an explanatory payload.
    pub async fn answer(&self, request: &ChatRequest) -> Result<ChatPayload, ChatError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::MessageTooLong(MAX_MESSAGE_CHARS));
        }

        let initial = vec![Message::user(enhance_user_message(message))];
        let outcome = ConversationDriver::new(self.backend.as_ref(), self.driver_config.clone())
            .run_outcome(&self.system_prompt, initial, &self.tools, self.gate.as_ref())
            .await;
        let failed = outcome.failed();
        let mut envelope = outcome.envelope;
        if failed {
            return Ok(ChatPayload::from(envelope));
        }

        if let Some(sql) = envelope.sql.take() {
            envelope.sql = Some(self.gate.translate(&sql));
        }
        reconcile_dimensions(message, &mut envelope);

        let Some(sql) = envelope.sql.clone() else {
            return Ok(ChatPayload::from(envelope));
        };

        if let SqlDecision::Reject(reason) = self.gate.validator().validate(&sql) {
            warn!(%reason, "Final SQL rejected");
            return Ok(ChatPayload {
                answer: format!("Unsafe SQL: {reason}"),
                ..ChatPayload::from(envelope)
            });
        }

        match self.gate.execute_sql(&sql).await {
            Ok(output) => {
                info!(rows = output.rows.len(), "Chat answered");
                Ok(ChatPayload {
                    answer: envelope.answer,
                    sql: Some(output.sql),
                    viz: envelope.viz,
                    rows: Some(output.rows),
                    schema: Some(output.schema),
                })
            }
            Err(err @ (ToolError::Rejected { .. } | ToolError::Incomplete { .. })) => Ok(ChatPayload {
                answer: format!("Unsafe SQL: {err}"),
                ..ChatPayload::from(envelope)
            }),
            Err(err) => {
                let text = err.to_string();
                let truncated: String = text.chars().take(MAX_DB_ERROR_CHARS).collect();
                Ok(ChatPayload {
                    answer: format!("Database error: {truncated}"),
                    ..ChatPayload::from(envelope)
                })
            }
        }
    }
}
