//! System prompt loading and dimension hints.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use copilot_core::{Dimension, ModelEnvelope};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an analytics assistant. Use the query_sql tool to answer.";

static REGION_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bregion\b").unwrap());
static CATEGORY_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bcategory\b").unwrap());

/// Read the system prompt from `path`, or fall back to the built-in one.
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            debug!(path = %path.display(), "System prompt loaded");
            text
        }
        Ok(_) => {
            warn!(path = %path.display(), "System prompt file is empty, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read system prompt, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// The single dimension a question asks about, when it names exactly one of
/// category or region.
pub fn requested_dimension(message: &str) -> Option<Dimension> {
    let lower = message.to_lowercase();
    match (lower.contains("categor"), lower.contains("region")) {
        (true, false) => Some(Dimension::Category),
        (false, true) => Some(Dimension::Region),
        _ => None,
    }
}

/// Append a note steering the model to the dimension the user named.
pub fn enhance_user_message(message: &str) -> String {
    match requested_dimension(message) {
        Some(Dimension::Category) => format!("{message} IMPORTANT: Use the category column, NOT region."),
        Some(Dimension::Region) => format!("{message} IMPORTANT: Use the region column."),
        _ => message.to_string(),
    }
}

/// Swap category/region in the envelope when the model grouped by the
/// dimension the user did not ask for. Returns whether anything changed.
pub fn reconcile_dimensions(message: &str, envelope: &mut ModelEnvelope) -> bool {
    let Some(wanted) = requested_dimension(message) else {
        return false;
    };
    let Some(sql) = envelope.sql.as_deref() else {
        return false;
    };
    let (wrong, wrong_word, right_word) = match wanted {
        Dimension::Category => (Dimension::Region, &*REGION_WORD, &*CATEGORY_WORD),
        _ => (Dimension::Category, &*CATEGORY_WORD, &*REGION_WORD),
    };
    if !wrong_word.is_match(sql) || right_word.is_match(sql) {
        return false;
    }

    let corrected = wrong_word.replace_all(sql, wanted.as_str()).into_owned();
    debug!(from = wrong.as_str(), to = wanted.as_str(), "Reconciling dimension with the question");
    envelope.sql = Some(corrected);

    if let Some(viz) = envelope.viz.as_mut() {
        if viz.x == Some(wrong) {
            viz.x = Some(wanted);
        }
        if let Some(group) = viz.group_by.as_mut() {
            let mut swapped: Vec<Dimension> = Vec::with_capacity(group.len());
            for dim in group.iter().map(|&d| if d == wrong { wanted } else { d }) {
                if !swapped.contains(&dim) {
                    swapped.push(dim);
                }
            }
            *group = swapped;
        }
    }
    true
}
