use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use super::{AppState, Owner};
use crate::db::Media;
use crate::error::{ServiceResult, ValidationError};

/// Multipart field holding the uploaded file.
const FILE_FIELD: &str = "file";

pub(super) async fn upload(
    State(state): State<AppState>,
    Owner(owner): Owner,
    mut multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<Media>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ValidationError::invalid("file", e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(ToString::to_string);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ValidationError::invalid("file", e.body_text()))?;

        let media = state
            .media
            .store(
                &owner,
                file_name.as_deref(),
                content_type.as_deref(),
                &data,
                Utc::now(),
            )
            .await?;
        return Ok((StatusCode::CREATED, Json(media)));
    }

    Err(ValidationError::invalid("file", "multipart field `file` is required").into())
}

pub(super) async fn delete(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    state.media.delete(&owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
