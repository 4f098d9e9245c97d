//! Copilot API crate - axum HTTP surface for the analytics assistant.
//!
//! Exposes a health check and the chat endpoint that runs one question
//! through the orchestration engine.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
