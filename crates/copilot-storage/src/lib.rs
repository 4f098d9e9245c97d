//! Copilot Storage crate - the Repository capability over SQLite.
//!
//! Provides a SQLite database with migrations for the `retail_sales` table,
//! a `Repository` trait the tool gate queries through, value conversion to
//! JSON-native form, and deterministic demo data.

pub mod db;
pub mod migrations;
pub mod repository;
pub mod seed;
pub mod value;

pub use db::Database;
pub use repository::{infer_schema, QueryCancel, QueryRows, Repository, SaleRecord, SqliteRepository};
pub use seed::seed_demo_data;
pub use value::{Row, SqlValue};
