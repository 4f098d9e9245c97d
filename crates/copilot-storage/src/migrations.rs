//! Database schema migrations.
//!
//! Applies the analytics schema: the `retail_sales` fact table and the
//! schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use copilot_core::error::CopilotError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), CopilotError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CopilotError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CopilotError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: retail_sales");
    }

    Ok(())
}

/// Version 1: retail sales fact table.
///
/// Declared column types drive value conversion on read, so `date` stays
/// `DATE` and `net_sales` keeps its `DECIMAL(12,2)` scale.
fn apply_v1(conn: &Connection) -> Result<(), CopilotError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS retail_sales (
            date        DATE NOT NULL,
            store_id    VARCHAR NOT NULL,
            store_name  VARCHAR NOT NULL,
            region      VARCHAR NOT NULL,
            category    VARCHAR NOT NULL,
            sku         VARCHAR NOT NULL,
            units       INTEGER NOT NULL,
            net_sales   DECIMAL(12,2) NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_retail_sales_date ON retail_sales(date);
        CREATE INDEX IF NOT EXISTS idx_retail_sales_region ON retail_sales(region);
        CREATE INDEX IF NOT EXISTS idx_retail_sales_category ON retail_sales(category);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'retail_sales');
        ",
    )
    .map_err(|e| CopilotError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
