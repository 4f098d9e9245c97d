pub mod config;
pub mod error;
pub mod tool;
pub mod types;

pub use config::CopilotConfig;
pub use error::{CopilotError, Result};
pub use tool::{ToolExecutor, ToolFailure, ToolOutcome};
pub use types::*;
