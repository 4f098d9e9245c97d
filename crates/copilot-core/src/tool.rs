use async_trait::async_trait;

use crate::types::{ToolCall, ToolResult};

/// Why a tool call failed, in terms the model can act on.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolFailure {
    pub message: String,
    pub hint: String,
    /// Fatal failures end the turn instead of being fed back for a retry.
    pub fatal: bool,
}

/// Everything the conversation loop needs to know about one tool execution.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    /// Result block sent back to the model.
    pub result: ToolResult,
    /// The statement actually attempted, after any rewriting.
    pub sql: Option<String>,
    pub failure: Option<ToolFailure>,
}

impl ToolOutcome {
    pub fn success(result: ToolResult, sql: Option<String>) -> Self {
        Self {
            result,
            sql,
            failure: None,
        }
    }

    pub fn failed(result: ToolResult, sql: Option<String>, failure: ToolFailure) -> Self {
        Self {
            result,
            sql,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs model-issued tool calls.
///
/// Implementations never return an error: every failure is folded into the
/// outcome so the caller can feed it back to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> ToolOutcome;
}
