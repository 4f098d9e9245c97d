//! CLI argument definitions for the copilot binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use copilot_core::config::{BackendKind, CopilotConfig};
use copilot_core::error::CopilotError;

/// Analytics copilot: answers questions about retail sales with SQL.
#[derive(Parser, Debug)]
#[command(name = "copilot", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Model backend: converse, chat, function_call or demo.
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// SQLite database path.
    #[arg(short = 'd', long = "db")]
    pub db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Answer one question, print the payload as JSON and exit.
    #[arg(long = "ask", value_name = "QUESTION")]
    pub ask: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > COPILOT_CONFIG env var > config/copilot.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("COPILOT_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("config").join("copilot.toml")
    }

    /// Apply flag overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut CopilotConfig) -> Result<(), CopilotError> {
        if let Some(port) = self.port {
            config.general.port = port;
        }
        if let Some(ref backend) = self.backend {
            config.backend.kind = backend.parse::<BackendKind>()?;
        }
        if let Some(ref db) = self.db {
            config.database.path = db.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        Ok(())
    }
}
