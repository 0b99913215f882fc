//! Domain errors returned by the service layer.

use thiserror::Error;

use crate::db::Platform;

/// A request that cannot be accepted as submitted.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("at least one target account is required")]
    NoTargets,
    #[error("content for {platform} is {length} characters, the limit is {limit}")]
    ContentTooLong {
        platform: Platform,
        limit: usize,
        length: usize,
    },
    #[error("{platform} posts require at least one media item")]
    MediaRequired { platform: Platform },
    #[error("{platform} posts accept at most {max} media items")]
    TooManyMedia { platform: Platform, max: usize },
    #[error("scheduled time must be in the future")]
    InvalidSchedule,
    #[error("OAuth state is unknown or expired")]
    InvalidOAuthState,
    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ValidationError {
    /// Stable machine-readable code for API clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoTargets => "no_targets",
            Self::ContentTooLong { .. } => "content_too_long",
            Self::MediaRequired { .. } => "media_required",
            Self::TooManyMedia { .. } => "too_many_media",
            Self::InvalidSchedule => "invalid_schedule",
            Self::InvalidOAuthState => "invalid_oauth_state",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// The request field the error refers to, when there is one.
    #[must_use]
    pub fn field(&self) -> Option<String> {
        match self {
            Self::NoTargets => Some("target_account_ids".to_string()),
            Self::ContentTooLong { platform, .. } => Some(format!("content.{platform}")),
            Self::MediaRequired { .. } | Self::TooManyMedia { .. } => Some("media_ids".to_string()),
            Self::InvalidSchedule => Some("scheduled_for".to_string()),
            Self::InvalidOAuthState => Some("state".to_string()),
            Self::Invalid { field, .. } => Some((*field).to_string()),
        }
    }

    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("OAuth code exchange failed: {0}")]
    OAuthExchange(String),

    #[error("this {platform} account is already connected")]
    DuplicateAccount { platform: Platform },

    #[error("post {0} can no longer be edited")]
    PostNotEditable(i64),

    /// Advisory: the post is live on a platform that cannot delete it remotely.
    #[error("post is published on {} and will not be removed there; confirm to delete locally", join_platforms(.platforms))]
    ExternalDeleteUnsupported { platforms: Vec<Platform> },

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl ServiceError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_too_long_names_platform_and_limit() {
        let err = ValidationError::ContentTooLong {
            platform: Platform::Twitter,
            limit: 280,
            length: 281,
        };
        assert_eq!(err.code(), "content_too_long");
        assert_eq!(err.field().as_deref(), Some("content.twitter"));
        assert!(err.to_string().contains("twitter"));
        assert!(err.to_string().contains("280"));
    }

    #[test]
    fn test_external_delete_message_lists_platforms() {
        let err = ServiceError::ExternalDeleteUnsupported {
            platforms: vec![Platform::Instagram],
        };
        assert!(err.to_string().contains("instagram"));
    }
}
