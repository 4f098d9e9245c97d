//! Bounded retry accounting for error-feedback loops.
//!
//! A caller-local counter: each recorded failure either grants one more
//! attempt or reports that the ceiling has been reached.

use copilot_core::Message;

/// Retries granted after the first attempt.
pub const DEFAULT_RETRY_CEILING: u32 = 2;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again; `attempt` is the 1-based retry number.
    Retry { attempt: u32 },
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryController {
    ceiling: u32,
    retries: u32,
    failures: u32,
    last_failure: Option<String>,
}

impl RetryController {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            retries: 0,
            failures: 0,
            last_failure: None,
        }
    }

    /// Record a failure and decide whether another attempt is allowed.
    pub fn record_failure(&mut self, failure: impl Into<String>) -> RetryDecision {
        self.last_failure = Some(failure.into());
        self.failures += 1;
        if self.retries < self.ceiling {
            self.retries += 1;
            RetryDecision::Retry {
                attempt: self.retries,
            }
        } else {
            RetryDecision::Exhausted
        }
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Failed attempts recorded so far, counting the first.
    pub fn attempts(&self) -> u32 {
        self.failures
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// User-role feedback asking the model to fix its last tool call.
    pub fn feedback_message(error: &str, hint: &str) -> Message {
        let mut text = format!("The query failed: {error}");
        if !hint.is_empty() {
            text.push_str("\nHint: ");
            text.push_str(hint);
        }
        text.push_str("\nPlease fix the SQL and call query_sql again.");
        Message::user(text)
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_CEILING)
    }
}
