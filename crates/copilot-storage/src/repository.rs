//! The Repository capability and its SQLite implementation.
//!
//! The tool gate only ever sees `Repository`; the engine behind it is
//! swappable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use rusqlite::types::ValueRef;
use tracing::debug;

use copilot_core::error::CopilotError;
use copilot_core::types::{ColumnSchema, SqlDialect};

use crate::db::Database;
use crate::value::{Row, SqlValue};

static DECIMAL_SCALE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:DECIMAL|NUMERIC)\s*\(\s*\d+\s*,\s*(\d+)\s*\)").unwrap());

/// SQLite VM instructions between cancellation checks.
const CANCEL_CHECK_OPS: i32 = 1000;

/// Cancellation flag shared between a running query and its caller.
#[derive(Clone, Debug, Default)]
pub struct QueryCancel(Arc<AtomicBool>);

impl QueryCancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running query to stop at its next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Rows from one capped query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryRows {
    pub rows: Vec<Row>,
    /// The engine had more rows than the cap allowed.
    pub truncated: bool,
}

/// Read access to the analytics store.
pub trait Repository: Send + Sync {
    /// Run a query and return at most `max_rows` rows in engine order.
    ///
    /// Implementations stop reading once the cap is passed and abort with an
    /// error when `cancel` fires.
    fn query(&self, sql: &str, max_rows: usize, cancel: &QueryCancel) -> Result<QueryRows, CopilotError>;

    /// Column names and value types for a result set.
    fn infer_schema(&self, rows: &[Row]) -> Result<Vec<ColumnSchema>, CopilotError> {
        Ok(infer_schema(rows))
    }

    /// Dialect queries must be written in.
    fn dialect(&self) -> SqlDialect;
}

/// Schema derived from row values.
///
/// Column order follows the first row. A column that is null in the first
/// row takes its type from the first later row where it is not.
pub fn infer_schema(rows: &[Row]) -> Vec<ColumnSchema> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    first
        .iter()
        .map(|(name, value)| {
            let type_name = if value.is_null() {
                rows.iter()
                    .filter_map(|row| row.get(name))
                    .find(|v| !v.is_null())
                    .map(SqlValue::type_name)
                    .unwrap_or("null")
            } else {
                value.type_name()
            };
            ColumnSchema::new(name, type_name)
        })
        .collect()
}

/// One `retail_sales` fact row.
#[derive(Clone, Debug, PartialEq)]
pub struct SaleRecord {
    pub date: NaiveDate,
    pub store_id: String,
    pub store_name: String,
    pub region: String,
    pub category: String,
    pub sku: String,
    pub units: i64,
    pub net_sales: f64,
}

/// Repository over the local SQLite database.
pub struct SqliteRepository {
    db: Arc<Database>,
}

impl SqliteRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert fact rows in one transaction. Returns the number inserted.
    pub fn insert_sales(&self, records: &[SaleRecord]) -> Result<usize, CopilotError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CopilotError::Storage(format!("Failed to begin transaction: {}", e)))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO retail_sales
                         (date, store_id, store_name, region, category, sku, units, net_sales)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )
                    .map_err(|e| CopilotError::Storage(e.to_string()))?;
                for r in records {
                    stmt.execute(rusqlite::params![
                        r.date.format("%Y-%m-%d").to_string(),
                        r.store_id,
                        r.store_name,
                        r.region,
                        r.category,
                        r.sku,
                        r.units,
                        r.net_sales,
                    ])
                    .map_err(|e| CopilotError::Storage(format!("Failed to insert sale: {}", e)))?;
                }
            }
            tx.commit()
                .map_err(|e| CopilotError::Storage(format!("Failed to commit: {}", e)))?;
            Ok(records.len())
        })
    }

    /// Number of fact rows stored.
    pub fn count(&self) -> Result<i64, CopilotError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM retail_sales", [], |row| row.get(0))
                .map_err(|e| CopilotError::Storage(e.to_string()))
        })
    }
}

impl Repository for SqliteRepository {
    fn query(&self, sql: &str, max_rows: usize, cancel: &QueryCancel) -> Result<QueryRows, CopilotError> {
        self.db.with_conn(|conn| {
            if cancel.is_cancelled() {
                return Err(CopilotError::Storage("query cancelled".to_string()));
            }
            let flag = cancel.clone();
            conn.progress_handler(CANCEL_CHECK_OPS, Some(move || flag.is_cancelled()));
            let result = read_rows(conn, sql, max_rows, cancel);
            conn.progress_handler(0, None::<fn() -> bool>);
            result
        })
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }
}

fn read_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    max_rows: usize,
    cancel: &QueryCancel,
) -> Result<QueryRows, CopilotError> {
    let storage_error = |e: rusqlite::Error| {
        if cancel.is_cancelled() {
            CopilotError::Storage(format!("query cancelled: {}", e))
        } else {
            CopilotError::Storage(e.to_string())
        }
    };

    let mut stmt = conn.prepare(sql).map_err(storage_error)?;

    let names = unique_column_names(stmt.column_names().into_iter().map(str::to_string));
    let decls: Vec<Option<String>> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().map(|t| t.to_ascii_uppercase()))
        .collect();

    let mut rows = stmt.query([]).map_err(storage_error)?;

    let mut out = QueryRows::default();
    while let Some(row) = rows.next().map_err(storage_error)? {
        if out.rows.len() == max_rows {
            out.truncated = true;
            break;
        }
        let mut converted = Row::new();
        for (idx, (name, decl)) in names.iter().zip(&decls).enumerate() {
            let raw = row.get_ref(idx).map_err(storage_error)?;
            converted.push(name.clone(), convert_value(raw, decl.as_deref()));
        }
        out.rows.push(converted);
    }
    debug!(rows = out.rows.len(), truncated = out.truncated, "sqlite query complete");
    Ok(out)
}

/// Result column names with repeats suffixed `_2`, `_3`, ... so every row
/// key is distinct.
fn unique_column_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let names: Vec<String> = names.into_iter().collect();
    let mut taken: HashSet<String> = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut n = 2;
        while taken.contains(&candidate) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        taken.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// Map a SQLite storage value onto `SqlValue` using the declared column type.
fn convert_value(raw: ValueRef<'_>, decl: Option<&str>) -> SqlValue {
    match (raw, decl) {
        (ValueRef::Null, _) => SqlValue::Null,
        (ValueRef::Integer(i), Some(d)) if d.starts_with("BOOL") => SqlValue::Bool(i != 0),
        (ValueRef::Integer(i), Some(d)) if decimal_scale(d).is_some() => {
            SqlValue::Decimal(format_decimal(i as f64, decimal_scale(d).unwrap_or(0)))
        }
        (ValueRef::Integer(i), _) => SqlValue::Integer(i),
        (ValueRef::Real(f), Some(d)) if decimal_scale(d).is_some() => {
            SqlValue::Decimal(format_decimal(f, decimal_scale(d).unwrap_or(0)))
        }
        (ValueRef::Real(f), _) => SqlValue::Float(f),
        (ValueRef::Text(bytes), decl) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match decl {
                Some("DATE") => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map(SqlValue::Date)
                    .unwrap_or(SqlValue::Text(text)),
                Some("DATETIME") | Some("TIMESTAMP") => parse_timestamp(&text)
                    .map(SqlValue::Timestamp)
                    .unwrap_or(SqlValue::Text(text)),
                _ => SqlValue::Text(text),
            }
        }
        (ValueRef::Blob(bytes), _) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn decimal_scale(decl: &str) -> Option<usize> {
    DECIMAL_SCALE
        .captures(decl)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn format_decimal(value: f64, scale: usize) -> String {
    format!("{:.*}", scale, value)
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}
