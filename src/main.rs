//! MeshSeeks CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use meshseeks::cli::{commands, Cli, Commands};
use meshseeks::domain::ports::TaskExecutor;
use meshseeks::infrastructure::config::ConfigLoader;
use meshseeks::infrastructure::executor::CodeAssistantExecutor;
use meshseeks::infrastructure::logging;
use meshseeks::infrastructure::storage::CheckpointStore;
use meshseeks::services::{EventBus, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };
    logging::init(&config.logging);

    let store = Arc::new(CheckpointStore::new(
        &config.checkpoint_dir,
        config.max_checkpoints_per_session,
    ));
    let executor: Arc<dyn TaskExecutor> = Arc::new(CodeAssistantExecutor::new(&config));
    let orchestrator = Orchestrator::bootstrap(config, store, executor, EventBus::new());

    orchestrator.pool().start_health_monitor().await;
    orchestrator.sessions().start_auto_checkpoint().await;

    let outcome = match &cli.command {
        Commands::Solve {
            prompt,
            work_folder,
            approach,
            summary,
        } => {
            commands::handle_solve(
                &orchestrator,
                prompt,
                work_folder,
                approach.as_deref(),
                *summary,
                cli.json,
            )
            .await
        }
        Commands::Analyze {
            prompt,
            work_folder,
        } => commands::handle_analyze(&orchestrator, prompt, work_folder, cli.json).await,
        Commands::Status => commands::handle_status(&orchestrator, cli.json).await,
        Commands::Resume {
            session_id,
            checkpoint,
            reset_failed,
        } => {
            commands::handle_resume(
                &orchestrator,
                session_id,
                checkpoint.clone(),
                *reset_failed,
                cli.json,
            )
            .await
        }
        Commands::Sessions => commands::handle_sessions(&orchestrator, cli.json).await,
    };

    orchestrator.shutdown().await;
    outcome
}
