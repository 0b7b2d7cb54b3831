//! shiftline server binary.

use shiftline::{Config, Reporter, Server, ServerError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long to let the reporter flush queued diagnostics on exit
const REPORTER_FLUSH: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        transport = %config.transport,
        transform = %config.transform,
        byte_limit = config.byte_limit,
        max_drain = config.max_drain,
        workers = ?config.workers,
        "Starting shiftline server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(serve(config))?;
    Ok(())
}

async fn serve(config: Config) -> Result<(), ServerError> {
    let config = Arc::new(config);
    let (reporter, reporter_task) = Reporter::spawn(config.reporter_capacity);

    let server = Server::bind(config, reporter).await?;
    let result = server.run_until(shutdown_signal()).await;

    // Handlers still running keep the reporter alive; don't wait on them forever
    let _ = tokio::time::timeout(REPORTER_FLUSH, reporter_task).await;
    result
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
