//! Deterministic demo data for the `retail_sales` table.

use chrono::{Duration, NaiveDate};
use tracing::info;

use copilot_core::error::CopilotError;

use crate::repository::{SaleRecord, SqliteRepository};

/// Days of history generated, ending at the anchor date.
pub const DEMO_DAYS: i64 = 120;

const STORES: &[(&str, &str, &str)] = &[
    ("S01", "North Plaza", "North"),
    ("S02", "Lakeside", "North"),
    ("S03", "Harbor Point", "South"),
    ("S04", "Palm Court", "South"),
    ("S05", "Riverside", "East"),
    ("S06", "Market Square", "East"),
    ("S07", "Canyon Mall", "West"),
    ("S08", "Sunset Row", "West"),
];

/// (category, sku, unit price)
const PRODUCTS: &[(&str, &str, f64)] = &[
    ("Electronics", "ELEC-001", 199.99),
    ("Electronics", "ELEC-002", 49.50),
    ("Grocery", "GROC-001", 3.25),
    ("Grocery", "GROC-002", 7.80),
    ("Apparel", "APRL-001", 24.00),
    ("Apparel", "APRL-002", 59.90),
    ("Home", "HOME-001", 15.75),
    ("Home", "HOME-002", 89.00),
];

/// Generate the demo fact rows for the `DEMO_DAYS` days ending at `end`.
pub fn demo_records(end: NaiveDate) -> Vec<SaleRecord> {
    let start = end - Duration::days(DEMO_DAYS - 1);
    let mut records = Vec::with_capacity(DEMO_DAYS as usize * STORES.len() * PRODUCTS.len());
    for day in 0..DEMO_DAYS {
        let date = start + Duration::days(day);
        for (s, (store_id, store_name, region)) in STORES.iter().enumerate() {
            for (p, (category, sku, price)) in PRODUCTS.iter().enumerate() {
                let units = (day * 7 + s as i64 * 13 + p as i64 * 5) % 20 + 1;
                let net_sales = (units as f64 * price * 100.0).round() / 100.0;
                records.push(SaleRecord {
                    date,
                    store_id: store_id.to_string(),
                    store_name: store_name.to_string(),
                    region: region.to_string(),
                    category: category.to_string(),
                    sku: sku.to_string(),
                    units,
                    net_sales,
                });
            }
        }
    }
    records
}

/// Populate an empty table with demo rows. Returns the number inserted,
/// zero when the table already holds data.
pub fn seed_demo_data(repo: &SqliteRepository, end: NaiveDate) -> Result<usize, CopilotError> {
    if repo.count()? > 0 {
        return Ok(0);
    }
    let inserted = repo.insert_sales(&demo_records(end))?;
    info!(rows = inserted, "Seeded retail_sales demo data");
    Ok(inserted)
}
