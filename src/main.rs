//! taskflow-db - connection pool health probe and monitor.
//!
//! With `--check`, opens the pool, runs one health check, prints it as JSON
//! and exits non-zero when the database is unhealthy. Otherwise keeps the pool
//! and periodic health checks running until interrupted.

use std::sync::Arc;
use taskflow_db::config::Config;
use taskflow_db::db::Database;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    let settings = config.settings()?;
    info!("Starting taskflow-db v{}", env!("CARGO_PKG_VERSION"));

    let db = Arc::new(Database::connect(&settings)?);
    if let Err(e) = db.pool().initialize().await {
        error!(error = %e, "Failed to open connection pool");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }

    if config.check {
        let status = db.check_health().await;
        println!("{}", serde_json::to_string_pretty(&status)?);
        db.close().await;
        if !status.is_healthy {
            std::process::exit(1);
        }
        return Ok(());
    }

    db.monitor().on_status_change(|status| {
        if !status.is_healthy {
            warn!(issues = ?status.issues, "Health check reported issues");
        }
    });
    db.monitor().start();
    Database::install_global(Arc::clone(&db))?;

    info!("Monitoring database, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!(
        stats = %db.profiler().export_stats(),
        "Shutting down"
    );
    db.close().await;
    info!("Shutdown complete");
    Ok(())
}
