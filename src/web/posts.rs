use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppState, Owner};
use crate::db::{Platform, PostFilter, PostSort, PostStatus, PostWithTargets};
use crate::dispatcher;
use crate::error::ServiceResult;
use crate::scheduler::{PostPage, PostRequest};

const DEFAULT_PER_PAGE: i64 = 20;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListParams {
    status: Option<PostStatus>,
    platform: Option<Platform>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    search: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
    sort: Option<PostSort>,
    order: Option<SortOrder>,
}

impl From<ListParams> for PostFilter {
    fn from(params: ListParams) -> Self {
        Self {
            status: params.status,
            platform: params.platform,
            from: params.from,
            to: params.to,
            search: params.search,
            page: params.page.unwrap_or(1),
            per_page: params.per_page.unwrap_or(DEFAULT_PER_PAGE),
            sort: params.sort.unwrap_or_default(),
            descending: matches!(params.order.unwrap_or_default(), SortOrder::Desc),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct DeleteParams {
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RetryRequest {
    target_ids: Option<Vec<i64>>,
}

#[derive(Debug, Serialize)]
pub(super) struct RetryResponse {
    retried: Vec<i64>,
}

pub(super) async fn create_post(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<PostRequest>,
) -> ServiceResult<(StatusCode, Json<PostWithTargets>)> {
    let post = state
        .scheduler
        .create_post(&owner, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub(super) async fn list_posts(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(params): Query<ListParams>,
) -> ServiceResult<Json<PostPage>> {
    let filter = PostFilter::from(params);
    Ok(Json(state.scheduler.list_posts(&owner, &filter).await?))
}

pub(super) async fn get_post(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<i64>,
) -> ServiceResult<Json<PostWithTargets>> {
    Ok(Json(state.scheduler.get_post(&owner, id).await?))
}

pub(super) async fn update_post(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<i64>,
    Json(request): Json<PostRequest>,
) -> ServiceResult<Json<PostWithTargets>> {
    let post = state
        .scheduler
        .update_post(&owner, id, request, Utc::now())
        .await?;
    Ok(Json(post))
}

pub(super) async fn delete_post(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<i64>,
    Query(params): Query<DeleteParams>,
) -> ServiceResult<StatusCode> {
    state
        .scheduler
        .delete_post(&owner, id, params.confirm)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn retry_post(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<i64>,
    body: Option<Json<RetryRequest>>,
) -> ServiceResult<Json<RetryResponse>> {
    let target_ids = body.and_then(|Json(b)| b.target_ids);
    let retried =
        dispatcher::retry_post(&state.db, &owner, id, target_ids.as_deref(), Utc::now()).await?;
    Ok(Json(RetryResponse { retried }))
}
