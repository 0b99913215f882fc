use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::{accounts, media, posts, stats, AppState};
use crate::config::Config;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the router with all routes.
pub fn router(config: &Config) -> Router<AppState> {
    Router::new()
        // Posts
        .route("/posts", post(posts::create_post).get(posts::list_posts))
        .route(
            "/posts/:id",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/posts/:id/retry", post(posts::retry_post))
        // Accounts
        .route("/accounts", get(accounts::list_accounts))
        .route("/accounts/available", get(accounts::list_available))
        .route("/accounts/:id", delete(accounts::disconnect))
        .route(
            "/accounts/connect/:platform/init",
            get(accounts::init_connect),
        )
        .route(
            "/accounts/connect/:platform/callback",
            post(accounts::complete_connect),
        )
        .route("/accounts/refresh-token", post(accounts::refresh_token))
        .route(
            "/accounts/threads/refresh-token",
            post(accounts::refresh_threads_token),
        )
        // Aggregations
        .route("/dashboard-stats", get(stats::dashboard))
        .route("/platform-stats", get(stats::platform_stats))
        .route("/upcoming-posts", get(stats::upcoming))
        .route("/calendar", get(stats::calendar))
        // Media
        .route(
            "/media/upload",
            post(media::upload).layer(DefaultBodyLimit::max(
                config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
            )),
        )
        .route("/media/:id", delete(media::delete))
        .route("/healthz", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
