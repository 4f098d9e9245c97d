//! Copilot SQL crate - the safety gate in front of the analytics store.
//!
//! Every model-proposed statement passes through dialect translation and a
//! structural allow-list before it reaches a `Repository`. Failures are
//! classified into hints the model can act on.

pub mod classify;
pub mod error;
pub mod gate;
pub mod tool;
pub mod translator;
pub mod validator;

pub use classify::{classify_error, summarize_error, ErrorClass};
pub use error::ToolError;
pub use gate::{QueryOutput, SqlToolGate};
pub use tool::{query_sql_spec, QUERY_SQL_TOOL};
pub use translator::{compatibility_notes, translate};
pub use validator::{RejectReason, SqlDecision, SqlValidator, DEFAULT_COLUMNS};
