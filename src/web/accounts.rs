use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{AppState, Owner};
use crate::accounts::AccountWithSubAccounts;
use crate::db::{Account, AccountStatus, AvailableAccount, Platform};
use crate::error::{ServiceResult, ValidationError};
use crate::health::RefreshResult;

#[derive(Debug, Default, Deserialize)]
pub(super) struct AvailableParams {
    platform: Option<Platform>,
    status: Option<AccountStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct InitParams {
    frontend_origin: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct InitResponse {
    auth_url: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CallbackRequest {
    code: String,
    state: String,
}

#[derive(Debug, Serialize)]
pub(super) struct DisconnectResponse {
    deleted_sub_accounts: u64,
}

#[derive(Debug, Deserialize)]
pub(super) struct RefreshRequest {
    account_id: i64,
}

fn parse_platform(raw: &str) -> Result<Platform, ValidationError> {
    raw.parse()
        .map_err(|e| ValidationError::invalid("platform", format!("{e}")))
}

pub(super) async fn list_accounts(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ServiceResult<Json<Vec<AccountWithSubAccounts>>> {
    Ok(Json(state.accounts.list_accounts(&owner).await?))
}

pub(super) async fn list_available(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(params): Query<AvailableParams>,
) -> ServiceResult<Json<Vec<AvailableAccount>>> {
    let available = state
        .accounts
        .list_available(&owner, params.platform, params.status)
        .await?;
    Ok(Json(available))
}

pub(super) async fn init_connect(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(platform): Path<String>,
    Query(params): Query<InitParams>,
) -> ServiceResult<Json<InitResponse>> {
    let platform = parse_platform(&platform)?;
    let auth_url = state
        .accounts
        .init_connect(
            &owner,
            platform,
            params.frontend_origin.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok(Json(InitResponse { auth_url }))
}

pub(super) async fn complete_connect(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(platform): Path<String>,
    Json(request): Json<CallbackRequest>,
) -> ServiceResult<Json<Account>> {
    let platform = parse_platform(&platform)?;
    let account = state
        .accounts
        .complete_connect(&owner, platform, &request.code, &request.state, Utc::now())
        .await?;
    Ok(Json(account))
}

pub(super) async fn disconnect(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<i64>,
) -> ServiceResult<Json<DisconnectResponse>> {
    let deleted_sub_accounts = state.accounts.disconnect(&owner, id, Utc::now()).await?;
    Ok(Json(DisconnectResponse {
        deleted_sub_accounts,
    }))
}

pub(super) async fn refresh_token(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<RefreshRequest>,
) -> ServiceResult<Json<RefreshResult>> {
    let result = state
        .refresher
        .refresh_token(&owner, request.account_id, false, Utc::now())
        .await?;
    Ok(Json(result))
}

pub(super) async fn refresh_threads_token(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<RefreshRequest>,
) -> ServiceResult<Json<RefreshResult>> {
    let result = state
        .refresher
        .refresh_token(&owner, request.account_id, true, Utc::now())
        .await?;
    Ok(Json(result))
}
