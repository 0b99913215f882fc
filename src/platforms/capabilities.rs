//! Static per-platform capability table.

use chrono::Duration;

use crate::db::Platform;

/// How an account's token is renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Silent refresh through the OAuth token endpoint.
    OAuth,
    /// A long-lived token exchanged for a new one on request (Threads).
    Manual,
    /// No refresh path; the user reconnects.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Maximum content length in Unicode scalar values.
    pub char_limit: usize,
    pub media_required: bool,
    pub max_media: usize,
    pub refresh: RefreshKind,
    /// Fixed expiry warning window in days; `None` uses the configured
    /// fraction of the token lifetime.
    pub warning_window_days: Option<i64>,
    /// Whether a published post can be removed from the platform by us.
    pub remote_delete: bool,
}

impl Capabilities {
    #[must_use]
    pub fn warning_window(&self) -> Option<Duration> {
        self.warning_window_days.map(Duration::days)
    }
}

/// Capability lookup for a platform.
#[must_use]
pub const fn capabilities(platform: Platform) -> Capabilities {
    match platform {
        Platform::Facebook => Capabilities {
            char_limit: 63_206,
            media_required: false,
            max_media: 10,
            refresh: RefreshKind::OAuth,
            warning_window_days: None,
            remote_delete: true,
        },
        Platform::Instagram => Capabilities {
            char_limit: 2_200,
            media_required: true,
            max_media: 10,
            refresh: RefreshKind::OAuth,
            warning_window_days: None,
            remote_delete: false,
        },
        Platform::Twitter => Capabilities {
            char_limit: 280,
            media_required: false,
            max_media: 4,
            refresh: RefreshKind::OAuth,
            warning_window_days: None,
            remote_delete: true,
        },
        Platform::LinkedinIndividual | Platform::LinkedinOrganisation => Capabilities {
            char_limit: 3_000,
            media_required: false,
            max_media: 9,
            refresh: RefreshKind::OAuth,
            warning_window_days: None,
            remote_delete: true,
        },
        Platform::Threads => Capabilities {
            char_limit: 500,
            media_required: false,
            max_media: 10,
            refresh: RefreshKind::Manual,
            warning_window_days: Some(5),
            remote_delete: true,
        },
        Platform::Pinterest => Capabilities {
            char_limit: 500,
            media_required: true,
            max_media: 1,
            refresh: RefreshKind::None,
            warning_window_days: None,
            remote_delete: true,
        },
        Platform::Youtube => Capabilities {
            char_limit: 5_000,
            media_required: true,
            max_media: 1,
            refresh: RefreshKind::None,
            warning_window_days: None,
            remote_delete: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_limits() {
        assert_eq!(capabilities(Platform::Twitter).char_limit, 280);
        assert_eq!(capabilities(Platform::LinkedinIndividual).char_limit, 3_000);
        assert_eq!(capabilities(Platform::Instagram).char_limit, 2_200);
        assert_eq!(capabilities(Platform::Threads).char_limit, 500);
    }

    #[test]
    fn test_instagram_requires_media_and_cannot_delete_remotely() {
        let caps = capabilities(Platform::Instagram);
        assert!(caps.media_required);
        assert!(!caps.remote_delete);
    }

    #[test]
    fn test_only_threads_has_fixed_window() {
        for platform in Platform::ALL {
            let caps = capabilities(platform);
            if platform == Platform::Threads {
                assert_eq!(caps.warning_window(), Some(Duration::days(5)));
                assert_eq!(caps.refresh, RefreshKind::Manual);
            } else {
                assert_eq!(caps.warning_window(), None);
            }
        }
    }
}
