//! Classification of query-engine failures into actionable hints.

use std::fmt;

/// Longest raw engine message echoed back to the model.
pub const MAX_ERROR_CHARS: usize = 150;

/// Coarse failure category for an execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    UnknownFunction,
    UnknownExpression,
    Syntax,
    UnknownTable,
    Other,
}

impl ErrorClass {
    /// Hint for the model. `columns` is appended as the list it may use.
    pub fn hint(&self, table: &str, columns: &[String]) -> String {
        let base = match self {
            ErrorClass::UnknownFunction => "Use standard SQL functions only.".to_string(),
            ErrorClass::UnknownExpression => {
                "Reference only existing columns; aggregate aliases cannot be reused in WHERE."
                    .to_string()
            }
            ErrorClass::Syntax => {
                "Check SQL syntax, especially string quotes and parentheses.".to_string()
            }
            ErrorClass::UnknownTable => format!("Only use the {table} table."),
            ErrorClass::Other => "Simplify the query and try again.".to_string(),
        };
        format!("{base} Available columns: {}", columns.join(", "))
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::UnknownFunction => "unknown_function",
            ErrorClass::UnknownExpression => "unknown_expression",
            ErrorClass::Syntax => "syntax_error",
            ErrorClass::UnknownTable => "unknown_table",
            ErrorClass::Other => "other",
        };
        f.write_str(label)
    }
}

/// Categorize a ClickHouse, DuckDB or SQLite error message.
pub fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("unknown function") || has("no such function") || has("scalar function") {
        ErrorClass::UnknownFunction
    } else if has("unknown_table")
        || has("unknown table")
        || has("no such table")
        || (has("catalog error") && has("table"))
    {
        ErrorClass::UnknownTable
    } else if has("unknown expression")
        || has("unknown identifier")
        || has("missing columns")
        || has("no such column")
        || has("binder error")
    {
        ErrorClass::UnknownExpression
    } else if has("syntax error") || has("parser error") || has("incomplete input") {
        ErrorClass::Syntax
    } else {
        ErrorClass::Other
    }
}

/// Shorten an engine message for feedback.
///
/// ClickHouse messages are cut to the first sentence after `DB::Exception:`;
/// everything is capped at `MAX_ERROR_CHARS` characters.
pub fn summarize_error(message: &str) -> String {
    let mut text = message.trim();
    if let Some(idx) = text.find("DB::Exception:") {
        text = text[idx + "DB::Exception:".len()..].trim_start();
        if let Some(end) = text.find(". ") {
            text = &text[..=end];
        }
    }
    truncate_chars(text, MAX_ERROR_CHARS)
}

/// Truncate on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
