//! The `query_sql` tool contract exposed to model providers.

use serde_json::json;

use copilot_core::ToolSpec;

use crate::validator::DEFAULT_COLUMNS;

pub const QUERY_SQL_TOOL: &str = "query_sql";

/// Bump whenever the description or input schema changes.
pub const QUERY_SQL_VERSION: &str = "1.1.0";

/// Spec of the single tool the model may call.
pub fn query_sql_spec(table: &str) -> ToolSpec {
    let columns = DEFAULT_COLUMNS.join(", ");
    ToolSpec {
        name: QUERY_SQL_TOOL.to_string(),
        version: QUERY_SQL_VERSION.to_string(),
        description: format!(
            "Execute a validated SELECT query over the {table} table. IMPORTANT: The SQL query must be \
             COMPLETE and valid. It MUST include: SELECT columns FROM {table} [optional clauses]. \
             Never use '...' or placeholders. The table has columns: {columns}. When the user asks \
             about 'categories', use the category column. When they ask about 'regions', use the \
             region column. Always match the exact dimension the user specifies."
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": format!(
                        "A complete, valid SQL SELECT query. Must include SELECT, FROM {table}, and any \
                         necessary WHERE/GROUP BY/ORDER BY clauses. Do not use '...' or incomplete statements."
                    )
                }
            },
            "required": ["sql"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_required_sql_argument() {
        let spec = query_sql_spec("retail_sales");
        assert_eq!(spec.name, "query_sql");
        assert_eq!(spec.input_schema["required"], json!(["sql"]));
        assert_eq!(spec.input_schema["properties"]["sql"]["type"], "string");
        assert!(spec.description.contains("FROM retail_sales"));
        assert!(spec.description.contains("net_sales"));
    }
}
