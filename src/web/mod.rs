//! JSON REST API.

mod accounts;
mod error;
mod identity;
mod media;
mod posts;
mod routes;
mod stats;

pub use error::ErrorBody;
pub use identity::{Owner, USER_ID_HEADER};

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::accounts::AccountRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::health::TokenRefresher;
use crate::media::{MediaStore, FILES_ROUTE};
use crate::platforms::PlatformRegistry;
use crate::scheduler::FanoutScheduler;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub scheduler: FanoutScheduler,
    pub accounts: AccountRegistry,
    pub refresher: TokenRefresher,
    pub media: MediaStore,
}

impl AppState {
    #[must_use]
    pub fn new(db: Database, config: Arc<Config>, platforms: Arc<PlatformRegistry>) -> Self {
        let accounts = AccountRegistry::new(db.clone(), platforms.clone(), config.clone());
        Self {
            scheduler: FanoutScheduler::new(db.clone()),
            refresher: TokenRefresher::new(
                db.clone(),
                platforms,
                config.clone(),
                accounts.clone(),
            ),
            media: MediaStore::new(db.clone(), config.clone()),
            accounts,
            db,
            config,
        }
    }
}

/// Build the application router.
pub fn create_app(state: AppState) -> Router {
    let media_dir = state.config.media_dir.clone();

    Router::new()
        .merge(routes::router(&state.config))
        .nest_service(FILES_ROUTE, ServeDir::new(media_dir))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address is invalid or the listener fails.
pub async fn serve(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.web_host, state.config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Web server error")?;

    Ok(())
}
