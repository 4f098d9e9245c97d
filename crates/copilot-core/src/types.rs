use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Enums
// =============================================================================

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Outcome flag attached to a tool result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Chart kind requested by the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    #[default]
    Table,
}

/// Metric aggregation applied when plotting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
}

/// Canonical dimension columns a chart may be keyed on.
///
/// Physical aliases (`store_name`, `store_id`) and time-granularity tokens
/// (`month`, `quarter`, ...) collapse onto these names during normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Date,
    Store,
    Category,
    Region,
    Sku,
}

const TIME_GRANULARITY_TOKENS: &[&str] = &["month", "year", "quarter", "week", "day"];

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Date => "date",
            Dimension::Store => "store",
            Dimension::Category => "category",
            Dimension::Region => "region",
            Dimension::Sku => "sku",
        }
    }

    /// Map a raw column or granularity token onto its canonical dimension.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Returns `None` for tokens that name no known dimension.
    pub fn canonicalize(token: &str) -> Option<Dimension> {
        let token = token.trim().to_ascii_lowercase();
        if Self::is_time_granularity(&token) {
            return Some(Dimension::Date);
        }
        match token.as_str() {
            "date" => Some(Dimension::Date),
            "store" | "store_name" | "store_id" => Some(Dimension::Store),
            "category" => Some(Dimension::Category),
            "region" => Some(Dimension::Region),
            "sku" => Some(Dimension::Sku),
            _ => None,
        }
    }

    /// Whether the token is a time bucket rather than a physical column.
    pub fn is_time_granularity(token: &str) -> bool {
        let token = token.trim().to_ascii_lowercase();
        TIME_GRANULARITY_TOKENS.contains(&token.as_str())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target query engine for dialect translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    ClickHouse,
    DuckDb,
    #[default]
    Sqlite,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::ClickHouse => write!(f, "clickhouse"),
            SqlDialect::DuckDb => write!(f, "duckdb"),
            SqlDialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

// =============================================================================
// Conversation
// =============================================================================

/// A tool invocation issued by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// String-valued argument lookup.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }
}

/// The result of running one tool call, keyed by the call's id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub status: ToolStatus,
    pub payload: Value,
}

impl ToolResult {
    pub fn success(tool_use_id: impl Into<String>, payload: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolStatus::Success,
            payload,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, payload: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolStatus::Error,
            payload,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// One block of a structured message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolCall),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Message body: plain text or an ordered list of blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// The body as blocks; a plain-text body becomes a single text block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            MessageContent::Text(text) => vec![ContentBlock::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text of all text blocks, newline separated.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse(call) => Some(call),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult(result) => Some(result),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Schema of a tool exposed to the model.
///
/// `description` and `input_schema` are what the model reads; changing
/// either is a contract change and must bump `version`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,
    pub description: String,
    pub input_schema: Value,
}

// =============================================================================
// Envelope
// =============================================================================

/// Chart description attached to an answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VizSpec {
    #[serde(rename = "type")]
    pub chart: ChartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<Vec<String>>,
    #[serde(rename = "groupBy", default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<Dimension>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanations: Option<Vec<String>>,
}

impl VizSpec {
    pub fn new(chart: ChartType) -> Self {
        Self {
            chart,
            x: None,
            y: None,
            group_by: None,
            aggregation: None,
            explanations: None,
        }
    }
}

/// The normalized `{answer, sql, viz}` structure returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEnvelope {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viz: Option<VizSpec>,
}

impl ModelEnvelope {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sql: None,
            viz: None,
        }
    }

    /// A fallback envelope carrying diagnostic text only.
    pub fn degraded(answer: impl Into<String>) -> Self {
        Self::new(answer)
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_viz(mut self, viz: VizSpec) -> Self {
        self.viz = Some(viz);
        self
    }
}

/// Name and value type of a result column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

// =============================================================================
// Request / response
// =============================================================================

/// Inbound chat question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Payload returned to the caller of a chat turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viz: Option<VizSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Map<String, Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<ColumnSchema>>,
}

impl ChatPayload {
    pub fn message(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            ..Default::default()
        }
    }
}

impl From<ModelEnvelope> for ChatPayload {
    fn from(envelope: ModelEnvelope) -> Self {
        Self {
            answer: envelope.answer,
            sql: envelope.sql,
            viz: envelope.viz,
            rows: None,
            schema: None,
        }
    }
}
