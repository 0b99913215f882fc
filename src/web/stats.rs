use axum::extract::{Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use super::{AppState, Owner};
use crate::error::{ServiceResult, ValidationError};
use crate::stats::{self, CalendarDay, DashboardStats, PlatformStats, Snapshot, UpcomingPost};

const DEFAULT_UPCOMING_LIMIT: usize = 10;
const MAX_UPCOMING_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub(super) struct TzParams {
    tz: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct UpcomingParams {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CalendarParams {
    tz: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

/// Parse an IANA timezone name, defaulting to UTC.
fn parse_tz(raw: Option<&str>) -> Result<Tz, ValidationError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse()
            .map_err(|_| ValidationError::invalid("tz", format!("unknown timezone {name}"))),
    }
}

async fn snapshot(state: &AppState, owner: &str) -> ServiceResult<Snapshot> {
    Ok(Snapshot::load(state.db.pool(), owner).await?)
}

pub(super) async fn dashboard(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ServiceResult<Json<DashboardStats>> {
    let snapshot = snapshot(&state, &owner).await?;
    Ok(Json(stats::dashboard(&snapshot)))
}

pub(super) async fn platform_stats(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(params): Query<TzParams>,
) -> ServiceResult<Json<Vec<PlatformStats>>> {
    let tz = parse_tz(params.tz.as_deref())?;
    let snapshot = snapshot(&state, &owner).await?;
    Ok(Json(stats::platform_rollup(&snapshot, Utc::now(), tz)))
}

pub(super) async fn upcoming(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(params): Query<UpcomingParams>,
) -> ServiceResult<Json<Vec<UpcomingPost>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_UPCOMING_LIMIT)
        .min(MAX_UPCOMING_LIMIT);
    let snapshot = snapshot(&state, &owner).await?;
    Ok(Json(stats::upcoming(&snapshot, limit)))
}

pub(super) async fn calendar(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(params): Query<CalendarParams>,
) -> ServiceResult<Json<Vec<CalendarDay>>> {
    let tz = parse_tz(params.tz.as_deref())?;
    let snapshot = snapshot(&state, &owner).await?;
    Ok(Json(stats::calendar(&snapshot, tz, params.from, params.to)))
}
