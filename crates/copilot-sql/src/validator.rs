//! Structural allow-list validator for model-proposed SQL.
//!
//! This is not a parser. It rejects statement separators, comments and
//! DDL/DML verbs anywhere in the text, requires a `SELECT` prefix and pins
//! every `FROM`/`JOIN` target to a single table. Column tokens outside the
//! known set are reported but never rejected.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Physical columns of `retail_sales`.
pub const DEFAULT_COLUMNS: &[&str] = &[
    "date",
    "store_id",
    "store_name",
    "region",
    "category",
    "sku",
    "units",
    "net_sales",
];

static FORBIDDEN_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(drop|insert|update|delete|alter|create|truncate|grant|revoke|attach|detach|pragma|vacuum|into)\b",
    )
    .unwrap()
});

static SELECT_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)^\s*select\b").unwrap());

static FROM_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bfrom\s+([A-Za-z0-9_."`\[\]]+)"#).unwrap());

static JOIN_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bjoin\s+([A-Za-z0-9_."`\[\]]+)"#).unwrap());

static FROM_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bfrom\s+[A-Za-z0-9_."`\[\]]+(?:\s+(?:as\s+)?[A-Za-z_][A-Za-z0-9_]*)?\s*,"#)
        .unwrap()
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(\s*\()?").unwrap());

const KEYWORDS: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "cast", "cross", "current", "day",
    "days", "desc", "distinct", "else", "end", "false", "filter", "first", "following",
    "from", "full", "group", "having", "in", "inner", "integer", "interval", "is", "join",
    "last", "left", "like", "ilike", "limit", "month", "months", "not", "null", "nulls",
    "offset", "on", "or", "order", "outer", "over", "partition", "preceding", "quarter",
    "range", "real", "right", "row", "rows", "select", "text", "then", "true", "unbounded",
    "union", "varchar", "week", "when", "where", "with", "year", "years",
];

/// Why a statement was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    /// Separator, comment marker or DDL/DML verb.
    ForbiddenToken(String),
    NotSelect,
    MissingFrom,
    TableNotAllowed(String),
    MultipleTables,
}

impl RejectReason {
    /// Remediation text fed back to the model.
    pub fn hint(&self, table: &str) -> String {
        let shape = format!(
            "Valid SQL format: SELECT columns FROM {table} [WHERE conditions] [GROUP BY columns] [ORDER BY columns]."
        );
        match self {
            RejectReason::Empty | RejectReason::NotSelect => {
                format!("Only SELECT queries are allowed. {shape}")
            }
            RejectReason::ForbiddenToken(_) => format!(
                "Remove semicolons, comments (--, /* */), or DDL/DML keywords from your SQL. {shape}"
            ),
            RejectReason::MissingFrom => format!("Add 'FROM {table}' to your SELECT statement."),
            RejectReason::TableNotAllowed(_) | RejectReason::MultipleTables => {
                format!("Only use the {table} table, with no joins to other tables. {shape}")
            }
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "Empty SQL"),
            RejectReason::ForbiddenToken(token) => {
                write!(f, "Forbidden keyword or comment detected: {token}")
            }
            RejectReason::NotSelect => write!(f, "Only SELECT queries are allowed"),
            RejectReason::MissingFrom => write!(f, "Missing FROM clause"),
            RejectReason::TableNotAllowed(table) => write!(f, "Table '{table}' is not allowed"),
            RejectReason::MultipleTables => write!(f, "Only a single table may be queried"),
        }
    }
}

/// Outcome of validating one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlDecision {
    Allow,
    Reject(RejectReason),
}

impl SqlDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SqlDecision::Allow)
    }

    /// `(ok, reason)` form; the reason is empty when allowed.
    pub fn as_pair(&self) -> (bool, String) {
        match self {
            SqlDecision::Allow => (true, String::new()),
            SqlDecision::Reject(reason) => (false, reason.to_string()),
        }
    }
}

/// Allow-list validator bound to one table.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    table: String,
    columns: Vec<String>,
}

impl SqlValidator {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into().to_ascii_lowercase(),
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_ascii_lowercase()).collect();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Validate a single statement.
    pub fn validate(&self, sql: &str) -> SqlDecision {
        let text = strip_terminator(sql);
        if text.is_empty() {
            return SqlDecision::Reject(RejectReason::Empty);
        }

        for marker in [";", "--", "/*", "*/"] {
            if text.contains(marker) {
                return SqlDecision::Reject(RejectReason::ForbiddenToken(marker.to_string()));
            }
        }
        if let Some(m) = FORBIDDEN_VERB.find(text) {
            return SqlDecision::Reject(RejectReason::ForbiddenToken(
                m.as_str().to_ascii_lowercase(),
            ));
        }

        if !SELECT_PREFIX.is_match(text) {
            return SqlDecision::Reject(RejectReason::NotSelect);
        }

        let masked = mask_literals(text);
        let tables: Vec<String> = FROM_TABLE
            .captures_iter(&masked)
            .chain(JOIN_TABLE.captures_iter(&masked))
            .filter_map(|caps| caps.get(1))
            .map(|m| unquote(m.as_str()))
            .collect();

        if tables.is_empty() {
            return SqlDecision::Reject(RejectReason::MissingFrom);
        }
        if let Some(other) = tables.iter().find(|t| **t != self.table) {
            return SqlDecision::Reject(RejectReason::TableNotAllowed(other.clone()));
        }
        if FROM_LIST.is_match(&masked) {
            return SqlDecision::Reject(RejectReason::MultipleTables);
        }

        let unknown = self.unrecognized_columns(text);
        if !unknown.is_empty() {
            debug!(tokens = ?unknown, "SQL references tokens outside the column allow-list");
        }
        SqlDecision::Allow
    }

    /// Bare identifiers that are neither known columns, the table, keywords,
    /// function names nor aliases. Reported only; never grounds for rejection.
    pub fn unrecognized_columns(&self, sql: &str) -> Vec<String> {
        let masked = mask_literals(sql);
        let mut seen = BTreeSet::new();
        let mut previous: Option<String> = None;
        for caps in WORD.captures_iter(&masked) {
            let Some(whole) = caps.get(0) else { continue };
            let is_call = caps.get(1).is_some();
            let word = whole
                .as_str()
                .trim_end_matches(|c: char| c == '(' || c.is_whitespace())
                .to_ascii_lowercase();
            let after_as = previous.as_deref() == Some("as");
            let preceded_by_digit = whole.start() > 0
                && masked.as_bytes()[whole.start() - 1].is_ascii_alphanumeric();
            if !is_call
                && !after_as
                && !preceded_by_digit
                && word != self.table
                && !KEYWORDS.contains(&word.as_str())
                && !self.columns.iter().any(|c| *c == word)
            {
                seen.insert(word.clone());
            }
            previous = Some(word);
        }
        seen.into_iter().collect()
    }
}

/// Trim whitespace and one trailing statement terminator.
pub fn strip_terminator(sql: &str) -> &str {
    let trimmed = sql.trim();
    trimmed
        .strip_suffix(';')
        .map(str::trim_end)
        .unwrap_or(trimmed)
}

/// Blank out single-quoted literals so their contents cannot look like
/// table references.
fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    for c in sql.chars() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
        } else if in_literal {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn unquote(name: &str) -> String {
    name.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_ascii_lowercase()
}
