//! Conversation driver.
//!
//! Runs one bounded conversation: model call, sequential tool execution,
//! error feedback, and envelope extraction. Every exit produces a
//! well-formed `ModelEnvelope`.
//!
//! States: Init -> ModelCall -> (ToolRequested -> ToolExec -> ModelCall)* -> Done | Failed

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use copilot_core::config::CopilotConfig;
use copilot_core::{ContentBlock, Message, ModelEnvelope, ToolExecutor, ToolFailure, ToolSpec};

use crate::backend::{ModelBackend, TurnRequest};
use crate::envelope::EnvelopeExtractor;
use crate::error::ProviderError;
use crate::guidance::provider_failure_envelope;
use crate::retry::{RetryController, RetryDecision, DEFAULT_RETRY_CEILING};

pub const DEFAULT_MAX_MODEL_CALLS: u32 = 8;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Init,
    ModelCall,
    ToolRequested,
    ToolExec,
    Done,
    Failed,
}

impl DriverState {
    /// Whether `self -> next` is a legal step.
    pub fn can_transition_to(self, next: DriverState) -> bool {
        matches!(
            (self, next),
            (DriverState::Init, DriverState::ModelCall)
                | (DriverState::ModelCall, DriverState::ToolRequested)
                | (DriverState::ModelCall, DriverState::Done)
                | (DriverState::ModelCall, DriverState::Failed)
                | (DriverState::ToolRequested, DriverState::ToolExec)
                | (DriverState::ToolExec, DriverState::ModelCall)
                | (DriverState::ToolExec, DriverState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DriverState::Done | DriverState::Failed)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Init => "init",
            DriverState::ModelCall => "model_call",
            DriverState::ToolRequested => "tool_requested",
            DriverState::ToolExec => "tool_exec",
            DriverState::Done => "done",
            DriverState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Error-feedback retries after the first tool failure.
    pub max_tool_retries: u32,
    pub max_model_calls: u32,
    /// Upper bound on one model invocation.
    pub call_timeout: Duration,
}

impl DriverConfig {
    pub fn from_config(config: &CopilotConfig) -> Self {
        Self {
            max_tool_retries: config.tools.max_tool_retries,
            max_model_calls: config.tools.max_model_calls,
            call_timeout: Duration::from_secs(config.backend.request_timeout_secs),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_tool_retries: DEFAULT_RETRY_CEILING,
            max_model_calls: DEFAULT_MAX_MODEL_CALLS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Final envelope plus the state the driver stopped in.
#[derive(Clone, Debug)]
pub struct DriverOutcome {
    pub state: DriverState,
    pub envelope: ModelEnvelope,
}

impl DriverOutcome {
    /// The turn ended on a failure path and the envelope is degraded.
    pub fn failed(&self) -> bool {
        self.state == DriverState::Failed
    }
}

pub struct ConversationDriver<'a> {
    backend: &'a dyn ModelBackend,
    config: DriverConfig,
    extractor: EnvelopeExtractor,
}

impl<'a> ConversationDriver<'a> {
    pub fn new(backend: &'a dyn ModelBackend, config: DriverConfig) -> Self {
        Self {
            backend,
            config,
            extractor: EnvelopeExtractor::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: EnvelopeExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Drive the conversation to a final envelope.
    pub async fn run(
        &self,
        system: &str,
        initial: Vec<Message>,
        tools: &[ToolSpec],
        executor: &dyn ToolExecutor,
    ) -> ModelEnvelope {
        self.run_outcome(system, initial, tools, executor).await.envelope
    }

    /// Like `run`, also reporting the terminal state.
    pub async fn run_outcome(
        &self,
        system: &str,
        initial: Vec<Message>,
        tools: &[ToolSpec],
        executor: &dyn ToolExecutor,
    ) -> DriverOutcome {
        let mut state = DriverState::Init;
        let envelope = self.drive(&mut state, system, initial, tools, executor).await;
        DriverOutcome { state, envelope }
    }

    async fn drive(
        &self,
        state: &mut DriverState,
        system: &str,
        initial: Vec<Message>,
        tools: &[ToolSpec],
        executor: &dyn ToolExecutor,
    ) -> ModelEnvelope {
        let info = self.backend.info();
        let mut messages = initial;
        let mut retry = RetryController::new(self.config.max_tool_retries);
        let mut last_sql: Option<String> = None;
        let mut last_good_sql: Option<String> = None;
        let mut model_calls = 0u32;
        let max_model_calls = self.config.max_model_calls.max(1);

        loop {
            if model_calls >= max_model_calls {
                transition(state, DriverState::Failed);
                warn!(backend = info.name, model_calls, "Model call limit reached");
                let mut envelope = ModelEnvelope::degraded(format!(
                    "I stopped after {model_calls} model calls without reaching an answer."
                ));
                envelope.sql = last_sql;
                return envelope;
            }

            transition(state, DriverState::ModelCall);
            let request = TurnRequest {
                system,
                messages: &messages,
                tools,
                attempt: model_calls,
            };
            model_calls += 1;
            debug!(backend = info.name, model = %info.model, attempt = request.attempt, "Invoking model");

            let reply = match tokio::time::timeout(self.config.call_timeout, self.backend.invoke(&request)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(err)) => {
                    transition(state, DriverState::Failed);
                    warn!(backend = info.name, error = %err, "Provider call failed");
                    let mut envelope = provider_failure_envelope(&err, &info);
                    envelope.sql = last_sql;
                    return envelope;
                }
                Err(_) => {
                    transition(state, DriverState::Failed);
                    let err = ProviderError::Timeout(self.config.call_timeout);
                    warn!(backend = info.name, error = %err, "Provider call timed out");
                    let mut envelope = provider_failure_envelope(&err, &info);
                    envelope.sql = last_sql;
                    return envelope;
                }
            };

            let calls: Vec<_> = reply.tool_calls().into_iter().cloned().collect();
            if calls.is_empty() {
                transition(state, DriverState::Done);
                let mut envelope = self.extractor.extract(&reply.raw_output());
                if envelope.sql.is_none() {
                    envelope.sql = last_good_sql;
                }
                info!(backend = info.name, model_calls, has_sql = envelope.sql.is_some(), "Conversation complete");
                return envelope;
            }

            transition(state, DriverState::ToolRequested);
            messages.push(reply.into_message());

            transition(state, DriverState::ToolExec);
            let mut results = Vec::with_capacity(calls.len());
            let mut round_failure: Option<ToolFailure> = None;
            for call in &calls {
                debug!(tool = %call.name, id = %call.id, "Executing tool call");
                let outcome = executor.execute(call).await;
                if outcome.sql.is_some() {
                    last_sql.clone_from(&outcome.sql);
                }
                match outcome.failure {
                    None => last_good_sql.clone_from(&outcome.sql),
                    Some(failure) => {
                        if failure.fatal {
                            transition(state, DriverState::Failed);
                            warn!(error = %failure.message, "Fatal tool failure");
                            let mut envelope = ModelEnvelope::degraded(format!(
                                "The query could not be completed: {}",
                                failure.message
                            ));
                            envelope.sql = last_sql;
                            return envelope;
                        }
                        round_failure = Some(failure);
                    }
                }
                results.push(ContentBlock::ToolResult(outcome.result));
            }
            messages.push(Message::user_blocks(results));

            if let Some(failure) = round_failure {
                match retry.record_failure(failure.message.clone()) {
                    RetryDecision::Retry { attempt } => {
                        warn!(attempt, ceiling = retry.ceiling(), error = %failure.message, "Tool failed, asking the model to fix it");
                        messages.push(RetryController::feedback_message(&failure.message, &failure.hint));
                    }
                    RetryDecision::Exhausted => {
                        transition(state, DriverState::Failed);
                        warn!(attempts = retry.attempts(), error = %failure.message, "Tool retries exhausted");
                        return exhausted_envelope(retry.attempts(), &failure, last_sql);
                    }
                }
            }
        }
    }
}

fn exhausted_envelope(attempts: u32, failure: &ToolFailure, sql: Option<String>) -> ModelEnvelope {
    let mut answer = format!(
        "I couldn't complete the query after {attempts} attempts. Last error: {}",
        failure.message
    );
    if !failure.hint.is_empty() {
        answer.push_str("\nHint: ");
        answer.push_str(&failure.hint);
    }
    let mut envelope = ModelEnvelope::degraded(answer);
    envelope.sql = sql;
    envelope
}

fn transition(state: &mut DriverState, next: DriverState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal driver transition {state} -> {next}"
    );
    debug!(from = %state, to = %next, "Driver state");
    *state = next;
}
