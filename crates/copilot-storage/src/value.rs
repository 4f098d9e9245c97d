//! Engine-neutral query values and rows.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};

/// A single cell returned by a repository query.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Fixed-point number rendered at its declared scale.
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Type label reported in result schemas.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Integer(_) => "integer",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "string",
            SqlValue::Date(_) => "date",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Blob(_) => "blob",
        }
    }

    /// Convert to a JSON-native value.
    ///
    /// Decimals become JSON numbers, dates become ISO-8601 strings and
    /// non-finite floats become null.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Float(f) => float_to_json(*f),
            SqlValue::Decimal(text) => match text.parse::<f64>() {
                Ok(f) => float_to_json(f),
                Err(_) => Value::String(text.clone()),
            },
            SqlValue::Text(text) => Value::String(text.clone()),
            SqlValue::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            SqlValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
            SqlValue::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// One result row with columns in select-list order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    pub fn with(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// JSON object keyed by column name, preserving column order.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}
