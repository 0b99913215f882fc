use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use social_scheduler::config::Config;
use social_scheduler::db::Database;
use social_scheduler::dispatcher::Dispatcher;
use social_scheduler::health::TokenHealthMonitor;
use social_scheduler::platforms::PlatformRegistry;
use social_scheduler::web::{self, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting social-scheduler");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    info!(
        public_base_url = %config.public_base_url,
        workers = config.worker_concurrency,
        auto_retry_max = config.auto_retry_max,
        "Configuration loaded"
    );

    // Ensure data directories exist
    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create media directory: {}",
                config.media_dir.display()
            )
        })?;

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let platforms = Arc::new(
        PlatformRegistry::from_config(&config).context("Failed to build platform clients")?,
    );
    if platforms.platforms().is_empty() {
        warn!("No platform apps configured - accounts cannot be connected");
    }

    let shutdown = CancellationToken::new();

    // Dispatcher
    let dispatcher = Dispatcher::new(config.clone(), db.clone(), platforms.clone());
    if let Err(e) = dispatcher.recover_on_startup(Utc::now()).await {
        error!("Failed to inspect interrupted dispatches on startup: {e:#}");
    }
    let dispatcher_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(shutdown).await })
    };
    info!("Dispatcher started");

    // Token health monitor
    let monitor = TokenHealthMonitor::new(db.clone(), config.clone());
    let monitor_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { monitor.run(shutdown).await })
    };

    // Web server
    let state = AppState::new(db, config, platforms);
    let web_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(state, shutdown).await {
                error!("Web server error: {e:#}");
            }
        })
    };

    shutdown_signal().await;

    info!("Shutting down...");
    shutdown.cancel();

    for (name, handle) in [
        ("dispatcher", dispatcher_handle),
        ("token health monitor", monitor_handle),
        ("web server", web_handle),
    ] {
        if let Err(e) = handle.await {
            error!(task = name, "Task did not shut down cleanly: {e}");
        }
    }

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,social_scheduler=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
