//! Network-free backend for demos and tests.
//!
//! Picks one canned query by keyword, asks for it through the tool protocol,
//! and answers with a JSON envelope once the tool result comes back.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use copilot_core::{ContentBlock, Message, Role, ToolCall, ToolResult};

use super::blocks::new_call_id;
use super::{BackendInfo, ModelBackend, ModelReply, TurnRequest};
use crate::error::ProviderError;

/// A canned analysis: the SQL to run and how to present it.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoPlan {
    pub answer: String,
    pub sql: String,
    pub viz: Value,
}

impl DemoPlan {
    /// Choose a plan from keywords in the question.
    pub fn for_question(question: &str) -> Self {
        let q = question.to_lowercase();
        let is_top = q.contains("top") || q.contains("best");
        let product = q.contains("product") || q.contains("sku");
        let units = q.contains("unit");
        let sales = q.contains("sales") || q.contains("revenue");
        let quarter = q.contains("quarter");
        let compare = q.contains("compare") || q.contains(" vs");
        let price = q.contains("price");

        if is_top && product && sales {
            let filter = if quarter {
                " WHERE date >= current_date - INTERVAL 90 DAY"
            } else {
                ""
            };
            return Self {
                answer: format!(
                    "Top products by net sales{}.",
                    if quarter { " in the last quarter" } else { "" }
                ),
                sql: format!(
                    "SELECT sku, SUM(net_sales) AS net_sales FROM retail_sales{filter} GROUP BY sku ORDER BY net_sales DESC LIMIT 10"
                ),
                viz: json!({
                    "type": "bar",
                    "x": "sku",
                    "y": ["net_sales"],
                    "aggregation": "sum",
                    "explanations": ["Sorted by total net sales", "Limit 10"],
                }),
            };
        }

        if is_top && product && units {
            return Self {
                answer: "Top products by units sold.".into(),
                sql: "SELECT sku, SUM(units) AS units FROM retail_sales GROUP BY sku ORDER BY units DESC LIMIT 10".into(),
                viz: json!({
                    "type": "bar",
                    "x": "sku",
                    "y": ["units"],
                    "aggregation": "sum",
                    "explanations": ["Sorted by total units", "Limit 10"],
                }),
            };
        }

        if compare && price && product {
            return Self {
                answer: "Average unit price for top-selling SKUs (approximation).".into(),
                sql: "SELECT sku, SUM(units) AS units, \
                      CASE WHEN SUM(units) = 0 THEN NULL ELSE SUM(net_sales) / SUM(units) END AS avg_unit_price \
                      FROM retail_sales GROUP BY sku ORDER BY units DESC LIMIT 10"
                    .into(),
                viz: json!({
                    "type": "bar",
                    "x": "sku",
                    "y": ["avg_unit_price"],
                    "aggregation": "avg",
                    "explanations": ["avg_unit_price = net_sales / units"],
                }),
            };
        }

        Self {
            answer: "Here is a breakdown of net sales over time by region.".into(),
            sql: "SELECT date, region, SUM(net_sales) AS net_sales FROM retail_sales GROUP BY date, region ORDER BY date".into(),
            viz: json!({
                "type": "line",
                "x": "date",
                "y": ["net_sales"],
                "groupBy": ["region"],
                "aggregation": "sum",
                "explanations": ["Summed by date and region"],
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DemoBackend;

impl DemoBackend {
    pub fn new() -> Self {
        Self
    }
}

/// The first user text in the conversation.
fn question(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(Message::text)
        .find(|t| !t.trim().is_empty())
        .unwrap_or_default()
}

/// The most recent tool result, if the last user turn carried one.
fn latest_result(messages: &[Message]) -> Option<ToolResult> {
    messages
        .iter()
        .rev()
        .find(|m| !m.tool_results().is_empty())
        .and_then(|m| m.tool_results().last().map(|r| (*r).clone()))
}

#[async_trait]
impl ModelBackend for DemoBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "demo",
            model: "demo".into(),
            region: None,
        }
    }

    async fn invoke(&self, request: &TurnRequest<'_>) -> Result<ModelReply, ProviderError> {
        let plan = DemoPlan::for_question(&question(request.messages));

        let Some(result) = latest_result(request.messages) else {
            debug!(sql = %plan.sql, "Demo backend requesting query");
            let call = ToolCall::new(new_call_id(), copilot_sql::QUERY_SQL_TOOL, json!({ "sql": plan.sql }));
            return Ok(ModelReply::from_blocks(vec![ContentBlock::ToolUse(call)]));
        };

        let envelope = if result.is_error() {
            let error = result
                .payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            json!({ "answer": format!("I couldn't run the demo query: {error}") })
        } else {
            json!({ "answer": plan.answer, "sql": plan.sql, "viz": plan.viz })
        };
        Ok(ModelReply::from_text(envelope.to_string()))
    }
}
