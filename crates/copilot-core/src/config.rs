use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CopilotError, Result};
use crate::types::SqlDialect;

/// Top-level configuration for the copilot service.
///
/// Loaded from `config/copilot.toml` by default. Every section falls back to
/// its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopilotConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl CopilotConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CopilotConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CopilotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// `USE_OLLAMA=1` and `BEDROCK_MOCK=1` select a backend kind; an explicit
    /// `COPILOT_BACKEND` wins over both.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("USE_OLLAMA").as_deref() == Some("1") {
            self.backend.kind = BackendKind::FunctionCall;
        }
        if lookup("BEDROCK_MOCK").as_deref() == Some("1") {
            self.backend.kind = BackendKind::Demo;
        }
        if let Some(kind) = lookup("COPILOT_BACKEND") {
            self.backend.kind = kind.parse()?;
        }
        if let Some(model_id) = lookup("BEDROCK_MODEL_ID") {
            self.backend.model_id = model_id;
        }
        if let Some(region) = lookup("AWS_REGION") {
            self.backend.region = region;
        }
        if let Some(token) = lookup("AWS_BEARER_TOKEN_BEDROCK") {
            self.backend.api_key = Some(token);
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.backend.ollama_url = url;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.backend.ollama_model = model;
        }
        if let Some(path) = lookup("COPILOT_DB_PATH") {
            self.database.path = path;
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP listen port.
    pub port: u16,
    /// File holding the system prompt. A missing file falls back to a
    /// built-in one-liner.
    pub system_prompt_path: Option<String>,
    /// Origins allowed by the CORS layer.
    pub cors_origins: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            port: 8000,
            system_prompt_path: None,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Which backend adapter drives the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Structured tool-use API with a one-shot chat fallback.
    Converse,
    /// Legacy single-shot completion API.
    Chat,
    /// Self-hosted function-calling API.
    FunctionCall,
    /// Offline keyword-driven backend.
    #[default]
    Demo,
}

impl std::str::FromStr for BackendKind {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "converse" => Ok(BackendKind::Converse),
            "chat" => Ok(BackendKind::Chat),
            "function_call" | "function-call" | "ollama" => Ok(BackendKind::FunctionCall),
            "demo" | "mock" => Ok(BackendKind::Demo),
            other => Err(CopilotError::Config(format!("unknown backend kind: {other}"))),
        }
    }
}

/// Model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub region: String,
    /// Runtime endpoint override. Derived from `region` when unset.
    pub endpoint: Option<String>,
    pub model_id: String,
    /// Identifiers tried, in order, by the chat fallback after `model_id`.
    pub fallback_model_ids: Vec<String>,
    /// Bearer token for the hosted runtime.
    pub api_key: Option<String>,
    pub ollama_url: String,
    pub ollama_model: String,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Sampling temperature used once a retry is in progress.
    pub retry_temperature: f32,
}

impl BackendConfig {
    pub fn runtime_endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            region: "us-east-1".to_string(),
            endpoint: None,
            model_id: "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string(),
            fallback_model_ids: vec![
                "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string(),
                "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
                "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
            ],
            api_key: None,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1".to_string(),
            request_timeout_secs: 60,
            max_tokens: 2048,
            temperature: 0.2,
            retry_temperature: 0.1,
        }
    }
}

/// Analytics database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// Dialect model-proposed SQL is translated into.
    pub dialect: SqlDialect,
    /// Populate an empty database with deterministic demo rows on start-up.
    pub seed_demo_data: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/retail.db".to_string(),
            dialect: SqlDialect::Sqlite,
            seed_demo_data: true,
        }
    }
}

/// Tool gate and conversation bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// The only table `query_sql` may read.
    pub table: String,
    pub max_rows: usize,
    /// Error-feedback retries before the turn is abandoned.
    pub max_tool_retries: u32,
    /// Hard cap on model invocations per turn.
    pub max_model_calls: u32,
    pub query_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            table: "retail_sales".to_string(),
            max_rows: 5000,
            max_tool_retries: 2,
            max_model_calls: 8,
            query_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CopilotConfig::default();
        assert_eq!(config.general.port, 8000);
        assert_eq!(config.backend.kind, BackendKind::Demo);
        assert_eq!(config.database.dialect, SqlDialect::Sqlite);
        assert_eq!(config.tools.table, "retail_sales");
        assert_eq!(config.tools.max_rows, 5000);
        assert_eq!(config.tools.max_tool_retries, 2);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[backend]
kind = "function_call"
ollama_model = "qwen2.5"

[database]
dialect = "clickhouse"
"#;
        let file = create_temp_config(content);
        let config = CopilotConfig::load(file.path()).unwrap();
        assert_eq!(config.backend.kind, BackendKind::FunctionCall);
        assert_eq!(config.backend.ollama_model, "qwen2.5");
        assert_eq!(config.database.dialect, SqlDialect::ClickHouse);
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.tools.max_model_calls, 8);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("[backend\nkind = ");
        let err = CopilotConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, CopilotError::Config(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = CopilotConfig::load_or_default(Path::new("/nonexistent/copilot.toml"));
        assert_eq!(config.general.port, 8000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("copilot.toml");

        let mut config = CopilotConfig::default();
        config.backend.kind = BackendKind::Converse;
        config.tools.max_rows = 100;
        config.save(&path).unwrap();

        let reloaded = CopilotConfig::load(&path).unwrap();
        assert_eq!(reloaded.backend.kind, BackendKind::Converse);
        assert_eq!(reloaded.tools.max_rows, 100);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CopilotConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("USE_OLLAMA", "1"),
                ("OLLAMA_MODEL", "mistral"),
                ("AWS_REGION", "eu-west-1"),
                ("COPILOT_DB_PATH", "/tmp/x.db"),
            ]))
            .unwrap();
        assert_eq!(config.backend.kind, BackendKind::FunctionCall);
        assert_eq!(config.backend.ollama_model, "mistral");
        assert_eq!(config.backend.region, "eu-west-1");
        assert_eq!(config.database.path, "/tmp/x.db");
    }

    #[test]
    fn test_explicit_backend_wins() {
        let mut config = CopilotConfig::default();
        config
            .apply_overrides(lookup_from(&[("BEDROCK_MOCK", "1"), ("COPILOT_BACKEND", "converse")]))
            .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Converse);
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let mut config = CopilotConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("COPILOT_BACKEND", "carrier-pigeon")]))
            .unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn test_runtime_endpoint() {
        let mut backend = BackendConfig::default();
        assert_eq!(
            backend.runtime_endpoint(),
            "https://bedrock-runtime.us-east-1.amazonaws.com"
        );
        backend.endpoint = Some("http://localhost:9000/".to_string());
        assert_eq!(backend.runtime_endpoint(), "http://localhost:9000");
    }
}
