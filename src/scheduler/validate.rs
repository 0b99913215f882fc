//! Validation of post create/update requests.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::db::{
    effective_content, AccountStatus, AvailableAccount, ChannelOverrides, Media, Platform,
};
use crate::error::{ServiceError, ServiceResult, ValidationError};
use crate::platforms::capabilities;

/// Remove repeated ids, keeping the first occurrence of each.
#[must_use]
pub fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Check that every requested target exists for the owner and is usable,
/// returning them in request order.
pub fn resolve_targets(
    requested: &[i64],
    found: Vec<AvailableAccount>,
) -> ServiceResult<Vec<AvailableAccount>> {
    if requested.is_empty() {
        return Err(ValidationError::NoTargets.into());
    }

    let mut resolved = Vec::with_capacity(requested.len());
    for id in requested {
        let account = found
            .iter()
            .find(|a| a.id == *id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("account {id}")))?;
        if account.status == AccountStatus::Disconnected {
            return Err(ValidationError::invalid(
                "target_account_ids",
                format!("account {id} is disconnected"),
            )
            .into());
        }
        resolved.push(account);
    }
    Ok(resolved)
}

/// Check that every requested media id exists for the owner, returning
/// the media in request order.
pub fn resolve_media(requested: &[i64], found: Vec<Media>) -> ServiceResult<Vec<Media>> {
    requested
        .iter()
        .map(|id| {
            found
                .iter()
                .find(|m| m.id == *id)
                .cloned()
                .ok_or_else(|| ServiceError::not_found(format!("media {id}")))
        })
        .collect()
}

/// Check media, schedule and content rules for every targeted platform.
pub fn validate_content(
    content: &str,
    overrides: &ChannelOverrides,
    media_count: usize,
    platforms: &BTreeSet<Platform>,
    scheduled_for: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    for platform in platforms {
        let caps = capabilities(*platform);
        if caps.media_required && media_count == 0 {
            return Err(ValidationError::MediaRequired {
                platform: *platform,
            });
        }
        if media_count > caps.max_media {
            return Err(ValidationError::TooManyMedia {
                platform: *platform,
                max: caps.max_media,
            });
        }
    }

    if let Some(at) = scheduled_for {
        if at <= now {
            return Err(ValidationError::InvalidSchedule);
        }
    }

    for platform in platforms {
        let limit = capabilities(*platform).char_limit;
        let length = effective_content(content, overrides, *platform).chars().count();
        if length > limit {
            return Err(ValidationError::ContentTooLong {
                platform: *platform,
                limit,
                length,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChannelOverride;
    use chrono::Duration;

    fn platforms(list: &[Platform]) -> BTreeSet<Platform> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        assert_eq!(dedup_ids(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[test]
    fn test_twitter_limit_named_in_error() {
        let content = "a".repeat(281);
        let err = validate_content(
            &content,
            &ChannelOverrides::new(),
            0,
            &platforms(&[Platform::Twitter, Platform::LinkedinIndividual]),
            None,
            Utc::now(),
        )
        .unwrap_err();
        match err {
            ValidationError::ContentTooLong {
                platform, limit, ..
            } => {
                assert_eq!(platform, Platform::Twitter);
                assert_eq!(limit, 280);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(validate_content(
            &content,
            &ChannelOverrides::new(),
            0,
            &platforms(&[Platform::LinkedinIndividual]),
            None,
            Utc::now(),
        )
        .is_ok());
    }

    #[test]
    fn test_override_content_is_checked_instead_of_draft() {
        let mut overrides = ChannelOverrides::new();
        overrides.insert(
            Platform::Twitter,
            ChannelOverride {
                content: "short".to_string(),
                use_custom_content: true,
            },
        );
        assert!(validate_content(
            &"a".repeat(500),
            &overrides,
            0,
            &platforms(&[Platform::Twitter]),
            None,
            Utc::now(),
        )
        .is_ok());
    }

    #[test]
    fn test_length_counts_scalar_values() {
        // 280 emoji are 280 chars but 1120 bytes
        let content = "🦀".repeat(280);
        assert!(validate_content(
            &content,
            &ChannelOverrides::new(),
            0,
            &platforms(&[Platform::Twitter]),
            None,
            Utc::now(),
        )
        .is_ok());
    }

    #[test]
    fn test_instagram_requires_media() {
        let err = validate_content(
            "hi",
            &ChannelOverrides::new(),
            0,
            &platforms(&[Platform::Instagram]),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MediaRequired {
                platform: Platform::Instagram
            }
        ));
    }

    #[test]
    fn test_too_many_media_for_twitter() {
        let err = validate_content(
            "hi",
            &ChannelOverrides::new(),
            5,
            &platforms(&[Platform::Twitter]),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::TooManyMedia { max: 4, .. }));
    }

    #[test]
    fn test_schedule_must_be_in_future() {
        let now = Utc::now();
        for at in [now, now - Duration::minutes(1)] {
            let err = validate_content(
                "hi",
                &ChannelOverrides::new(),
                0,
                &platforms(&[Platform::Facebook]),
                Some(at),
                now,
            )
            .unwrap_err();
            assert!(matches!(err, ValidationError::InvalidSchedule));
        }
    }

    #[test]
    fn test_resolve_targets_rejects_empty_and_unknown() {
        assert!(matches!(
            resolve_targets(&[], Vec::new()),
            Err(ServiceError::Validation(ValidationError::NoTargets))
        ));
        assert!(matches!(
            resolve_targets(&[42], Vec::new()),
            Err(ServiceError::NotFound(_))
        ));
    }
}
