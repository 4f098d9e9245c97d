//! Copilot Chat crate - the tool-orchestration engine.
//!
//! Drives a bounded multi-turn conversation with a tool-calling model
//! backend, runs the `query_sql` tool through the SQL gate, and normalizes
//! whatever the backend returns into a `ModelEnvelope`.

pub mod assistant;
pub mod backend;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod guidance;
pub mod prompt;
pub mod retry;

pub use assistant::AnalyticsAssistant;
pub use backend::{Backend, BackendInfo, ModelBackend, ModelReply, TurnRequest, WireFormat};
pub use driver::{ConversationDriver, DriverConfig, DriverOutcome, DriverState};
pub use envelope::{EnvelopeExtractor, RawOutput};
pub use error::{ChatError, ProviderError};
pub use retry::{RetryController, RetryDecision};
