use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::classify::ErrorClass;
use crate::validator::RejectReason;

/// A tool call that could not produce rows.
///
/// Every variant carries the hint fed back to the model alongside the
/// message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Missing required argument '{argument}'")]
    MissingArgument { argument: &'static str },

    #[error("Incomplete SQL query detected")]
    Incomplete { sql: String, hint: String },

    #[error("{reason}")]
    Rejected {
        reason: RejectReason,
        sql: String,
        hint: String,
    },

    #[error("{message}")]
    Execution {
        message: String,
        class: ErrorClass,
        sql: String,
        hint: String,
    },

    #[error("Query timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ToolError {
    pub fn hint(&self) -> &str {
        match self {
            ToolError::UnknownTool { .. } => "Call the query_sql tool with a single 'sql' argument.",
            ToolError::MissingArgument { .. } => "Provide the complete query in the 'sql' argument.",
            ToolError::Incomplete { hint, .. }
            | ToolError::Rejected { hint, .. }
            | ToolError::Execution { hint, .. } => hint.as_str(),
            ToolError::Timeout(_) => "Narrow the query with filters or a LIMIT.",
        }
    }

    /// The statement involved, after translation where it got that far.
    pub fn sql(&self) -> Option<&str> {
        match self {
            ToolError::Incomplete { sql, .. }
            | ToolError::Rejected { sql, .. }
            | ToolError::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Fatal errors end the turn rather than being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::Timeout(_))
    }

    /// Error payload of the tool result block.
    pub fn to_payload(&self) -> Value {
        json!({
            "error": self.to_string(),
            "hint": self.hint(),
        })
    }
}
