use anyhow::{Context, Result};
use ocr_filter_tuner::config::AppConfig;
use ocr_filter_tuner::controller::RunController;
use ocr_filter_tuner::errors::AppError;
use ocr_filter_tuner::observability;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel the run on Ctrl-C; the controller checkpoints what is scored and stops.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, checkpointing and stopping");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt signal"),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    observability::init_tracing(&config.observability)?;

    let mut controller = RunController::new(config)?;
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    match controller.run(&cancel).await {
        Ok(catalog) => {
            info!(
                completed = catalog.completed,
                front_size = catalog.len(),
                best_total = ?catalog.entries.first().map(|entry| entry.total_edits),
                "Done"
            );
            Ok(())
        }
        Err(AppError::Cancelled) => {
            warn!("Run cancelled before the initial population was scored");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
