//! Envelope extraction from free-form model output.
//!
//! An ordered chain of total decoders; the first one that yields a mapping
//! with an `answer` key wins. When none does, the raw text itself becomes
//! the answer, so extraction never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use copilot_core::{Dimension, ModelEnvelope, VizSpec};

/// Longest raw text kept as a degraded answer.
pub const DEFAULT_MAX_RAW_CHARS: usize = 1000;

/// Texts longer than this skip the balanced-brace scan.
const MAX_SCAN_BYTES: usize = 64 * 1024;

/// Largest balanced spans tried as JSON.
const MAX_SCAN_CANDIDATES: usize = 64;

/// Nesting depth followed when a JSON string decodes to another string.
const MAX_ENCODING_DEPTH: usize = 3;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Backend output before extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// The backend already produced a JSON value.
    Structured(Value),
    Text(String),
}

type Decoder = fn(&str) -> Option<ModelEnvelope>;

#[derive(Debug, Clone)]
pub struct EnvelopeExtractor {
    max_raw_chars: usize,
}

impl EnvelopeExtractor {
    pub fn new(max_raw_chars: usize) -> Self {
        Self { max_raw_chars }
    }

    pub fn extract(&self, raw: &RawOutput) -> ModelEnvelope {
        let text = match raw {
            RawOutput::Structured(value) => {
                if let Some(envelope) = envelope_from_value(value) {
                    return envelope;
                }
                match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            }
            RawOutput::Text(text) => text.clone(),
        };
        self.extract_text(&text)
    }

    pub fn extract_text(&self, text: &str) -> ModelEnvelope {
        const CHAIN: [(&str, Decoder); 4] = [
            ("json", decode_json),
            ("fenced", decode_fenced),
            ("brace_slice", decode_brace_slice),
            ("balanced_scan", decode_balanced),
        ];
        for (step, decode) in CHAIN {
            if let Some(envelope) = decode(text) {
                debug!(step, "Envelope extracted");
                return envelope;
            }
        }
        warn!(chars = text.chars().count(), "No envelope in model output; using raw text");
        ModelEnvelope::degraded(truncate_chars(text.trim(), self.max_raw_chars))
    }
}

impl Default for EnvelopeExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RAW_CHARS)
    }
}

/// Parse JSON, following up to `MAX_ENCODING_DEPTH` levels of string
/// re-encoding.
fn decode_json(text: &str) -> Option<ModelEnvelope> {
    let mut value: Value = serde_json::from_str(text.trim()).ok()?;
    for _ in 0..MAX_ENCODING_DEPTH {
        match value {
            Value::String(inner) => value = serde_json::from_str(inner.trim()).ok()?,
            _ => break,
        }
    }
    envelope_from_value(&value)
}

fn decode_fenced(text: &str) -> Option<ModelEnvelope> {
    FENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| decode_json(m.as_str()))
}

fn decode_brace_slice(text: &str) -> Option<ModelEnvelope> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    decode_json(&text[start..=end])
}

fn decode_balanced(text: &str) -> Option<ModelEnvelope> {
    if text.len() > MAX_SCAN_BYTES {
        return None;
    }
    let mut candidates = balanced_objects(text);
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));
    candidates.truncate(MAX_SCAN_CANDIDATES);
    candidates.into_iter().find_map(decode_json)
}

/// Every balanced `{...}` span, found in one pass.
///
/// Quotes only open string literals inside an object, so prose around the
/// objects cannot hide their braces.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (idx, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(idx),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Build an envelope from a mapping that has an `answer` key.
fn envelope_from_value(value: &Value) -> Option<ModelEnvelope> {
    let obj = value.as_object()?;
    let answer = match obj.get("answer")? {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let sql = obj
        .get("sql")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let viz = obj.get("viz").and_then(decode_viz);
    Some(ModelEnvelope { answer, sql, viz })
}

fn decode_viz(value: &Value) -> Option<VizSpec> {
    let mut viz = match value {
        Value::Object(_) => value.clone(),
        Value::String(s) => serde_json::from_str(s).ok()?,
        _ => return None,
    };
    normalize_viz(&mut viz);
    match serde_json::from_value(viz) {
        Ok(viz) => Some(viz),
        Err(e) => {
            debug!(error = %e, "Dropping invalid viz");
            None
        }
    }
}

/// Canonicalize a raw viz mapping in place.
///
/// Dimension aliases collapse to canonical names, time-granularity tokens
/// become `date` in `x` and disappear from `groupBy`, unknown dimensions are
/// dropped, and empty optional fields are removed.
pub fn normalize_viz(viz: &mut Value) {
    let Some(obj) = viz.as_object_mut() else {
        return;
    };

    if let Some(Value::String(t)) = obj.get_mut("type") {
        *t = t.trim().to_ascii_lowercase();
    }

    let x = obj
        .remove("x")
        .and_then(|v| v.as_str().and_then(Dimension::canonicalize));
    if let Some(dim) = x {
        obj.insert("x".into(), Value::from(dim.as_str()));
    }

    let raw_group = obj.remove("groupBy").or_else(|| obj.remove("group_by"));
    let mut group: Vec<Dimension> = Vec::new();
    for token in string_items(raw_group) {
        if Dimension::is_time_granularity(&token) {
            continue;
        }
        if let Some(dim) = Dimension::canonicalize(&token) {
            if !group.contains(&dim) {
                group.push(dim);
            }
        }
    }
    if !group.is_empty() {
        let values = group.iter().map(|d| Value::from(d.as_str())).collect();
        obj.insert("groupBy".into(), Value::Array(values));
    }

    for key in ["y", "explanations"] {
        let items = string_items(obj.remove(key));
        if !items.is_empty() {
            obj.insert(key.into(), Value::from(items));
        }
    }

    let aggregation = obj
        .remove("aggregation")
        .and_then(|v| v.as_str().map(|s| s.trim().to_ascii_lowercase()))
        .filter(|s| matches!(s.as_str(), "sum" | "avg" | "count"));
    if let Some(agg) = aggregation {
        obj.insert("aggregation".into(), Value::from(agg));
    }

    obj.retain(|_, v| !v.is_null());
}

/// Non-empty trimmed strings from a string or list-of-strings value.
fn string_items(value: Option<Value>) -> Vec<String> {
    let items = match value {
        Some(Value::String(s)) => vec![Value::String(s)],
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Mapping form of an envelope, as sent back over the wire.
pub fn envelope_to_map(envelope: &ModelEnvelope) -> Map<String, Value> {
    match serde_json::to_value(envelope) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::{Aggregation, ChartType};
    use proptest::prelude::*;
    use serde_json::json;

    fn extract(text: &str) -> ModelEnvelope {
        EnvelopeExtractor::default().extract_text(text)
    }

    #[test]
    fn test_plain_answer() {
        assert_eq!(extract(r#"{"answer":"hi"}"#), ModelEnvelope::new("hi"));
    }

    #[test]
    fn test_structured_mapping_accepted_directly() {
        let raw = RawOutput::Structured(json!({"answer": "ok", "sql": "SELECT 1 FROM t"}));
        let env = EnvelopeExtractor::default().extract(&raw);
        assert_eq!(env.answer, "ok");
        assert_eq!(env.sql.as_deref(), Some("SELECT 1 FROM t"));
    }

    #[test]
    fn test_structured_without_answer_falls_through() {
        let raw = RawOutput::Structured(json!({"text": "no answer here"}));
        let env = EnvelopeExtractor::default().extract(&raw);
        assert_eq!(env.answer, r#"{"text":"no answer here"}"#);
        assert!(env.sql.is_none());
    }

    #[test]
    fn test_double_encoded() {
        let inner = r#"{"answer":"inner","sql":"SELECT 1 FROM retail_sales"}"#;
        let outer = serde_json::to_string(inner).unwrap();
        let env = extract(&outer);
        assert_eq!(env.answer, "inner");
        assert_eq!(env.sql.as_deref(), Some("SELECT 1 FROM retail_sales"));
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here you go:\n```json\n{\"answer\": \"fenced\"}\n```\nThanks!";
        assert_eq!(extract(text).answer, "fenced");
    }

    #[test]
    fn test_embedded_in_prose() {
        let text = "Sure! {\"answer\": \"embedded\", \"viz\": {\"type\": \"bar\"}} Hope that helps.";
        let env = extract(text);
        assert_eq!(env.answer, "embedded");
        assert_eq!(env.viz.unwrap().chart, ChartType::Bar);
    }

    #[test]
    fn test_balanced_scan_prefers_longest_object() {
        // first '{' .. last '}' spans two objects and is not valid JSON
        let text = r#"note {"a": 1} then {"answer": "second", "sql": "SELECT 1 FROM t"} end"#;
        let env = extract(text);
        assert_eq!(env.answer, "second");
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"x {"answer": "use {braces} carefully"} y {"z": 1}"#;
        assert_eq!(extract(text).answer, "use {braces} carefully");
    }

    #[test]
    fn test_quotes_in_prose_do_not_hide_objects() {
        let text = r#"The model said "here": {"answer": "quoted"} and stopped"#;
        assert_eq!(extract(text).answer, "quoted");
    }

    #[test]
    fn test_balanced_spans_nested() {
        let spans = balanced_objects(r#"a {"x": {"y": "}"}} b {"z": 1"#);
        assert_eq!(spans, vec![r#"{"y": "}"}"#, r#"{"x": {"y": "}"}}"#]);
    }

    #[test]
    fn test_unclosed_braces_degrade_quickly() {
        let started = std::time::Instant::now();
        let text = "{".repeat(60_000);
        let env = extract(&text);
        assert_eq!(env.answer.chars().count(), DEFAULT_MAX_RAW_CHARS);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        let started = std::time::Instant::now();
        let env = extract(&r#"{"a": {}"#.repeat(7_000));
        assert!(env.sql.is_none());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_degraded_prose() {
        let env = extract("I could not find anything useful.");
        assert_eq!(env, ModelEnvelope::degraded("I could not find anything useful."));
    }

    #[test]
    fn test_degraded_truncates() {
        let long = "é".repeat(1500);
        let env = extract(&long);
        assert_eq!(env.answer.chars().count(), DEFAULT_MAX_RAW_CHARS);
        assert!(env.sql.is_none() && env.viz.is_none());
    }

    #[test]
    fn test_object_without_answer_degrades() {
        let env = extract(r#"{"result": 42}"#);
        assert_eq!(env.answer, r#"{"result": 42}"#);
    }

    #[test]
    fn test_non_string_answer_is_stringified() {
        assert_eq!(extract(r#"{"answer": 42}"#).answer, "42");
    }

    #[test]
    fn test_blank_sql_is_absent() {
        assert!(extract(r#"{"answer": "a", "sql": "  "}"#).sql.is_none());
    }

    #[test]
    fn test_normalize_store_alias() {
        let env = extract(r#"{"answer":"a","viz":{"type":"bar","x":"store_name"}}"#);
        assert_eq!(env.viz.unwrap().x, Some(Dimension::Store));
    }

    #[test]
    fn test_normalize_group_by_drops_time_tokens() {
        let env = extract(r#"{"answer":"a","viz":{"type":"line","x":"month","groupBy":["month","region"]}}"#);
        let viz = env.viz.unwrap();
        assert_eq!(viz.x, Some(Dimension::Date));
        assert_eq!(viz.group_by, Some(vec![Dimension::Region]));
    }

    #[test]
    fn test_normalize_empty_fields_collapse() {
        let mut viz = json!({
            "type": " Line ",
            "x": "",
            "y": [],
            "groupBy": ["quarter"],
            "aggregation": "",
            "explanations": ["", "  "]
        });
        normalize_viz(&mut viz);
        assert_eq!(viz, json!({"type": "line"}));
    }

    #[test]
    fn test_normalize_accepts_scalars_and_dedupes() {
        let mut viz = json!({
            "type": "bar",
            "y": "net_sales",
            "group_by": ["store_id", "store_name", "nonsense"],
            "aggregation": "SUM"
        });
        normalize_viz(&mut viz);
        let viz: VizSpec = serde_json::from_value(viz).unwrap();
        assert_eq!(viz.y, Some(vec!["net_sales".to_string()]));
        assert_eq!(viz.group_by, Some(vec![Dimension::Store]));
        assert_eq!(viz.aggregation, Some(Aggregation::Sum));
    }

    #[test]
    fn test_invalid_viz_is_dropped_not_fatal() {
        let env = extract(r#"{"answer":"a","sql":"SELECT 1 FROM t","viz":{"type":"pie"}}"#);
        assert_eq!(env.answer, "a");
        assert!(env.sql.is_some());
        assert!(env.viz.is_none());
    }

    #[test]
    fn test_envelope_to_map() {
        let map = envelope_to_map(&ModelEnvelope::new("x").with_sql("SELECT 1"));
        assert_eq!(map.get("sql"), Some(&json!("SELECT 1")));
        assert!(!map.contains_key("viz"));
    }

    proptest! {
        #[test]
        fn prop_prose_without_braces_degrades(text in "[^{}]{0,300}") {
            let env = extract(&text);
            prop_assume!(serde_json::from_str::<Value>(text.trim()).is_err());
            prop_assert_eq!(env.answer, text.trim().to_string());
            prop_assert!(env.sql.is_none());
            prop_assert!(env.viz.is_none());
        }

        #[test]
        fn prop_never_panics(text in any::<String>()) {
            let _ = extract(&text);
        }
    }
}
