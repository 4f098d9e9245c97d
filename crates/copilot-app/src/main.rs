//! Copilot application binary - composition root.
//!
//! 1. Load configuration (file, environment, flags)
//! 2. Open the SQLite database and seed demo data
//! 3. Build the model backend, SQL gate and assistant
//! 4. Serve the HTTP API, or answer one `--ask` question and exit

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use copilot_api::state::AppState;
use copilot_chat::AnalyticsAssistant;
use copilot_core::config::CopilotConfig;
use copilot_core::error::CopilotError;
use copilot_core::{ChatRequest, SqlDialect};
use copilot_storage::{seed_demo_data, Database, Repository, SqliteRepository};

use cli::CliArgs;

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn open_repository(config: &CopilotConfig) -> Result<Arc<SqliteRepository>, CopilotError> {
    if config.database.dialect != SqlDialect::Sqlite {
        return Err(CopilotError::Config(format!(
            "database.dialect is '{}' but only the bundled sqlite engine is available",
            config.database.dialect
        )));
    }
    let db = Database::new(Path::new(&config.database.path))?;
    let repo = SqliteRepository::new(Arc::new(db));
    if config.database.seed_demo_data {
        let today = chrono::Utc::now().date_naive();
        let inserted = seed_demo_data(&repo, today)?;
        if inserted > 0 {
            tracing::info!(rows = inserted, "Demo data seeded");
        }
    }
    Ok(Arc::new(repo))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = CopilotConfig::load_or_default(&config_file);
    config.apply_env_overrides()?;
    args.apply(&mut config)?;

    init_tracing(&config.general.log_level);
    tracing::info!("Starting copilot v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), backend = ?config.backend.kind, "Configuration resolved");

    let repo = open_repository(&config)?;
    let repo: Arc<dyn Repository> = repo;
    let assistant = AnalyticsAssistant::from_config(&config, repo)?;
    let info = assistant.backend_info();
    tracing::info!(backend = info.name, model = %info.model, "Model backend ready");

    if let Some(question) = args.ask {
        let payload = assistant.answer(&ChatRequest { message: question }).await?;
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let state = AppState::new(config, assistant);
    copilot_api::start_server(state).await?;
    Ok(())
}
