use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::Platform;
use crate::error::ServiceError;

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Platforms the post stays live on, for `external_delete_unsupported`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<Platform>>,
}

impl ErrorBody {
    pub(crate) fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
            platforms: None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match &self {
            Self::Validation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    field: err.field(),
                    ..ErrorBody::new(err.code(), message)
                },
            ),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, ErrorBody::new("not_found", message)),
            Self::DuplicateAccount { .. } => (
                StatusCode::CONFLICT,
                ErrorBody::new("duplicate_account", message),
            ),
            Self::PostNotEditable(_) => (
                StatusCode::CONFLICT,
                ErrorBody::new("post_not_editable", message),
            ),
            Self::ExternalDeleteUnsupported { platforms } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    platforms: Some(platforms.clone()),
                    ..ErrorBody::new("external_delete_unsupported", message)
                },
            ),
            Self::Conflict(_) => (StatusCode::CONFLICT, ErrorBody::new("conflict", message)),
            Self::OAuthExchange(_) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody::new("oauth_exchange_failed", message),
            ),
            Self::Database(err) => {
                tracing::error!("Request failed: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal", "internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
