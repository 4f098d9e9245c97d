//! The tool gate: translate, validate, execute and classify.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use copilot_core::config::ToolsConfig;
use copilot_core::error::CopilotError;
use copilot_core::{
    ColumnSchema, SqlDialect, ToolCall, ToolExecutor, ToolFailure, ToolOutcome, ToolResult,
};
use copilot_storage::{QueryCancel, Repository};

use crate::classify::{classify_error, summarize_error, truncate_chars};
use crate::error::ToolError;
use crate::tool::QUERY_SQL_TOOL;
use crate::translator::{compatibility_notes, translate};
use crate::validator::{strip_terminator, SqlDecision, SqlValidator};

pub const DEFAULT_MAX_ROWS: usize = 5000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

static DANGLING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(select|from|where|by|and|or|join|on|having|limit)\s*$").unwrap()
});

/// Rows and schema produced by one successful query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    /// The statement as executed, after translation.
    pub sql: String,
    pub rows: Vec<Map<String, Value>>,
    pub schema: Vec<ColumnSchema>,
    /// The engine had more rows than the cap allowed.
    pub truncated: bool,
}

impl QueryOutput {
    /// Success payload of the tool result block.
    pub fn to_payload(&self) -> Value {
        json!({
            "rows": self.rows,
            "schema": self.schema,
            "row_count": self.rows.len(),
            "truncated": self.truncated,
        })
    }
}

/// Safety gate in front of a `Repository`.
pub struct SqlToolGate {
    repo: Arc<dyn Repository>,
    validator: SqlValidator,
    dialect: SqlDialect,
    max_rows: usize,
    query_timeout: Duration,
}

impl SqlToolGate {
    /// Gate for `table`, translating into the repository's own dialect.
    pub fn new(repo: Arc<dyn Repository>, table: &str) -> Self {
        let dialect = repo.dialect();
        Self {
            repo,
            validator: SqlValidator::new(table),
            dialect,
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn from_config(repo: Arc<dyn Repository>, config: &ToolsConfig, dialect: SqlDialect) -> Self {
        Self::new(repo, &config.table)
            .with_dialect(dialect)
            .with_max_rows(config.max_rows)
            .with_query_timeout(Duration::from_secs(config.query_timeout_secs))
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    /// Translate a statement into the gate's dialect.
    pub fn translate(&self, sql: &str) -> String {
        translate(strip_terminator(sql), self.dialect)
    }

    /// Everything up to execution: completeness check, translation and
    /// validation. Returns the statement to run.
    pub fn prepare(&self, sql: &str) -> Result<String, ToolError> {
        let table = self.validator.table();
        if is_incomplete(sql) {
            return Err(ToolError::Incomplete {
                sql: sql.to_string(),
                hint: format!(
                    "The SQL must include: SELECT, FROM {table}, and optionally WHERE/GROUP BY/ORDER BY \
                     clauses. Do not use '...' or incomplete statements."
                ),
            });
        }

        let translated = self.translate(sql);
        for note in compatibility_notes(&translated, self.dialect) {
            warn!(dialect = %self.dialect, "{}", note);
        }

        match self.validator.validate(&translated) {
            SqlDecision::Allow => Ok(translated),
            SqlDecision::Reject(reason) => {
                let hint = format!(
                    "{} Your SQL: {}",
                    reason.hint(table),
                    truncate_chars(&translated, 100)
                );
                Err(ToolError::Rejected {
                    reason,
                    sql: translated,
                    hint,
                })
            }
        }
    }

    /// Translate, validate and run one statement.
    pub async fn execute_sql(&self, sql: &str) -> Result<QueryOutput, ToolError> {
        let sql = self.prepare(sql)?;
        debug!(sql = %truncate_chars(&sql, 200), "Executing query");

        let repo = Arc::clone(&self.repo);
        let max_rows = self.max_rows;
        let cancel = QueryCancel::new();
        let query = sql.clone();
        let task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || {
                let result = repo.query(&query, max_rows, &cancel)?;
                let schema = repo.infer_schema(&result.rows)?;
                Ok::<_, CopilotError>((result, schema))
            }
        });

        let joined = match tokio::time::timeout(self.query_timeout, task).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.cancel();
                warn!(timeout_ms = self.query_timeout.as_millis() as u64, "Query timed out, cancelling");
                return Err(ToolError::Timeout(self.query_timeout));
            }
        };
        let result = joined.map_err(|e| self.execution_error(&e.to_string(), &sql))?;
        let (result, schema) = result.map_err(|e| {
            let message = match e {
                CopilotError::Storage(msg) => msg,
                other => other.to_string(),
            };
            self.execution_error(&message, &sql)
        })?;

        info!(rows = result.rows.len(), truncated = result.truncated, "Query complete");
        Ok(QueryOutput {
            sql,
            rows: result.rows.iter().map(|r| r.to_json_map()).collect(),
            schema,
            truncated: result.truncated,
        })
    }

    fn execution_error(&self, raw: &str, sql: &str) -> ToolError {
        let class = classify_error(raw);
        warn!(class = %class, error = %raw, "Query failed");
        ToolError::Execution {
            message: summarize_error(raw),
            class,
            sql: sql.to_string(),
            hint: class.hint(self.validator.table(), self.validator.columns()),
        }
    }
}

#[async_trait]
impl ToolExecutor for SqlToolGate {
    async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let attempt = if call.name != QUERY_SQL_TOOL {
            Err(ToolError::UnknownTool {
                name: call.name.clone(),
            })
        } else {
            match call.str_arg("sql") {
                Some(sql) => self.execute_sql(sql).await,
                None => Err(ToolError::MissingArgument { argument: "sql" }),
            }
        };

        match attempt {
            Ok(output) => {
                let sql = output.sql.clone();
                ToolOutcome::success(ToolResult::success(&call.id, output.to_payload()), Some(sql))
            }
            Err(err) => {
                let sql = err
                    .sql()
                    .map(str::to_string)
                    .or_else(|| call.str_arg("sql").map(str::to_string));
                let failure = ToolFailure {
                    message: err.to_string(),
                    hint: err.hint().to_string(),
                    fatal: err.is_fatal(),
                };
                ToolOutcome::failed(ToolResult::error(&call.id, err.to_payload()), sql, failure)
            }
        }
    }
}

/// Placeholder or truncated statements the model sometimes emits.
fn is_incomplete(sql: &str) -> bool {
    let text = strip_terminator(sql);
    text.is_empty() || text.contains("...") || DANGLING_KEYWORD.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use copilot_core::ToolStatus;
    use copilot_storage::{seed_demo_data, Database, QueryRows, Row, SqlValue, SqliteRepository};

    fn seeded_gate() -> SqlToolGate {
        let repo = SqliteRepository::new(Arc::new(Database::in_memory().unwrap()));
        seed_demo_data(&repo, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()).unwrap();
        SqlToolGate::new(Arc::new(repo), "retail_sales")
    }

    fn call(sql: &str) -> ToolCall {
        ToolCall::new("tool-1", QUERY_SQL_TOOL, json!({ "sql": sql }))
    }

    struct SlowRepository;

    impl Repository for SlowRepository {
        fn query(&self, _sql: &str, _max_rows: usize, _cancel: &QueryCancel) -> Result<QueryRows, CopilotError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(QueryRows {
                rows: vec![Row::new().with("x", SqlValue::Integer(1))],
                truncated: false,
            })
        }

        fn dialect(&self) -> SqlDialect {
            SqlDialect::ClickHouse
        }
    }

    #[tokio::test]
    async fn test_top_skus_end_to_end() {
        let gate = seeded_gate();
        let outcome = gate
            .execute(&call(
                "SELECT sku, SUM(units) AS units FROM retail_sales GROUP BY sku ORDER BY units DESC LIMIT 10",
            ))
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.result.status, ToolStatus::Success);
        assert_eq!(outcome.result.tool_use_id, "tool-1");

        let rows = outcome.result.payload["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 8);
        assert!(rows.len() <= DEFAULT_MAX_ROWS);
        let schema = outcome.result.payload["schema"].as_array().unwrap();
        let names: Vec<&str> = schema.iter().map(|c| c["name"].as_str().unwrap()).collect();
        let keys: Vec<&str> = rows[0].as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(names, keys);
    }

    #[tokio::test]
    async fn test_rows_are_capped() {
        let gate = seeded_gate();
        let output = gate.execute_sql("SELECT * FROM retail_sales").await.unwrap();
        assert_eq!(output.rows.len(), 5000);
        assert!(output.truncated);
        assert_eq!(output.to_payload()["truncated"], json!(true));
        assert_eq!(output.schema.len(), 8);
        assert_eq!(output.rows[0]["date"], json!("2024-03-03"));
    }

    #[tokio::test]
    async fn test_translated_before_validation() {
        let gate = seeded_gate();
        let output = gate
            .execute_sql(
                "SELECT COUNT(*) AS n FROM retail_sales WHERE EXTRACT(MONTH FROM date) = 6;",
            )
            .await
            .unwrap();
        assert!(output.sql.contains("strftime('%m', date)"));
        assert_eq!(output.rows[0]["n"], json!(30 * 64));
    }

    #[tokio::test]
    async fn test_rejected_sql_is_never_executed() {
        let gate = seeded_gate();
        let outcome = gate.execute(&call("DELETE FROM retail_sales")).await;
        let failure = outcome.failure.clone().unwrap();
        assert!(failure.message.contains("Forbidden"));
        assert!(failure.hint.starts_with("Remove semicolons"));
        assert!(!failure.fatal);
        assert_eq!(outcome.result.status, ToolStatus::Error);

        let count = gate.execute_sql("SELECT COUNT(*) AS n FROM retail_sales").await.unwrap();
        assert_eq!(count.rows[0]["n"], json!(7680));
    }

    #[tokio::test]
    async fn test_execution_error_is_classified() {
        let gate = seeded_gate();
        let err = gate
            .execute_sql("SELECT revenue FROM retail_sales")
            .await
            .unwrap_err();
        match &err {
            ToolError::Execution { class, message, .. } => {
                assert_eq!(*class, crate::ErrorClass::UnknownExpression);
                assert!(message.contains("no such column"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(err.hint().contains("Available columns: date, store_id"));
    }

    #[tokio::test]
    async fn test_incomplete_sql() {
        let gate = seeded_gate();
        for sql in ["", "SELECT ... FROM retail_sales", "SELECT region FROM", "SELECT * FROM retail_sales WHERE"] {
            let err = gate.execute_sql(sql).await.unwrap_err();
            assert!(matches!(err, ToolError::Incomplete { .. }), "{sql}");
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_and_missing_argument() {
        let gate = seeded_gate();
        let outcome = gate
            .execute(&ToolCall::new("t", "drop_everything", json!({})))
            .await;
        assert!(outcome.failure.unwrap().message.contains("Unknown tool"));

        let outcome = gate.execute(&ToolCall::new("t", QUERY_SQL_TOOL, json!({}))).await;
        assert!(outcome.failure.unwrap().message.contains("'sql'"));
        assert!(outcome.sql.is_none());
    }

    #[tokio::test]
    async fn test_query_timeout_is_fatal() {
        let gate = SqlToolGate::new(Arc::new(SlowRepository), "retail_sales")
            .with_query_timeout(Duration::from_millis(20));
        assert_eq!(gate.dialect(), SqlDialect::ClickHouse);
        let outcome = gate.execute(&call("SELECT x FROM retail_sales")).await;
        let failure = outcome.failure.unwrap();
        assert!(failure.fatal);
        assert_eq!(outcome.sql.as_deref(), Some("SELECT x FROM retail_sales"));
    }

    #[tokio::test]
    async fn test_timed_out_query_releases_database() {
        let gate = seeded_gate().with_query_timeout(Duration::from_millis(500));
        let err = gate
            .execute_sql(
                "SELECT COUNT(*) AS n FROM retail_sales a JOIN retail_sales b JOIN retail_sales c",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
        assert!(err.is_fatal());

        let count = gate
            .execute_sql("SELECT COUNT(*) AS n FROM retail_sales")
            .await
            .unwrap();
        assert_eq!(count.rows[0]["n"], json!(7680));
    }
}
