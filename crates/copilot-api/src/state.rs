//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use copilot_chat::AnalyticsAssistant;
use copilot_core::config::CopilotConfig;

/// Shared application state. Cloned per request; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CopilotConfig>,
    pub assistant: Arc<AnalyticsAssistant>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: CopilotConfig, assistant: AnalyticsAssistant) -> Self {
        Self {
            config: Arc::new(config),
            assistant: Arc::new(assistant),
            start_time: Instant::now(),
        }
    }
}
