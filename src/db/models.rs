use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use thiserror::Error;

/// A social platform (or a LinkedIn account-type variant).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    Instagram,
    Twitter,
    LinkedinIndividual,
    LinkedinOrganisation,
    Threads,
    Pinterest,
    Youtube,
}

#[derive(Debug, Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl Platform {
    pub const ALL: [Self; 8] = [
        Self::Facebook,
        Self::Instagram,
        Self::Twitter,
        Self::LinkedinIndividual,
        Self::LinkedinOrganisation,
        Self::Threads,
        Self::Pinterest,
        Self::Youtube,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Twitter => "twitter",
            Self::LinkedinIndividual => "linkedin_individual",
            Self::LinkedinOrganisation => "linkedin_organisation",
            Self::Threads => "threads",
            Self::Pinterest => "pinterest",
            Self::Youtube => "youtube",
        }
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "facebook" => Ok(Self::Facebook),
            "instagram" => Ok(Self::Instagram),
            "twitter" | "x" => Ok(Self::Twitter),
            "linkedin_individual" | "linkedin" => Ok(Self::LinkedinIndividual),
            "linkedin_organisation" | "linkedin_organization" => Ok(Self::LinkedinOrganisation),
            "threads" => Ok(Self::Threads),
            "pinterest" => Ok(Self::Pinterest),
            "youtube" => Ok(Self::Youtube),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a connected account's token.
///
/// Variants are declared from healthiest to worst, so `max` picks the worse
/// of two statuses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccountStatus {
    Healthy,
    Warning,
    Error,
    Disconnected,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "disconnected" => Ok(Self::Disconnected),
            _ => Err(format!("unknown account status: {s}")),
        }
    }
}

/// Lifecycle status shared by posts and their targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    /// Whether a post in this status may still be edited.
    #[must_use]
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled)
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown post status: {s}")),
        }
    }
}

/// Kind of an uploaded media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// A connected identity on one platform.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub platform: Platform,
    pub external_user_id: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub last_error: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_refreshed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A publishable identity under an account (a Facebook Page, an Instagram
/// business account, or the account itself for platforms without pages).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubAccount {
    pub id: i64,
    pub account_id: i64,
    pub external_id: String,
    pub name: String,
    pub platform: Platform,
    pub follower_count: i64,
    pub can_post: bool,
    pub can_schedule: bool,
    pub can_upload_media: bool,
    pub max_media_count: i64,
    pub max_characters: i64,
    pub status: AccountStatus,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SubAccount {
    /// Status after applying the parent account's health: a sub-account is
    /// never reported healthier than the account that owns it.
    #[must_use]
    pub fn effective_status(&self, parent: AccountStatus) -> AccountStatus {
        self.status.max(parent)
    }
}

/// A sub-account joined with its parent account, as returned by
/// `GET /accounts/available`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AvailableAccount {
    pub id: i64,
    pub account_id: i64,
    pub external_id: String,
    pub name: String,
    pub platform: Platform,
    pub follower_count: i64,
    pub can_post: bool,
    pub can_schedule: bool,
    pub can_upload_media: bool,
    pub max_media_count: i64,
    pub max_characters: i64,
    /// Effective status (never healthier than `parent_status`).
    pub status: AccountStatus,
    pub parent_status: AccountStatus,
    pub parent_name: String,
}

/// Per-platform replacement content for a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub content: String,
    #[serde(default)]
    pub use_custom_content: bool,
}

pub type ChannelOverrides = HashMap<Platform, ChannelOverride>;

/// A unit of authored content.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub owner: String,
    pub content: String,
    pub channel_overrides: Json<ChannelOverrides>,
    pub platform_options: Option<Json<serde_json::Value>>,
    pub status: PostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Content to publish on `platform`: the channel override when it is
    /// enabled, the draft content otherwise.
    #[must_use]
    pub fn effective_content(&self, platform: Platform) -> &str {
        effective_content(&self.content, &self.channel_overrides, platform)
    }
}

/// Resolve the content for a platform from draft content and overrides.
#[must_use]
pub fn effective_content<'a>(
    content: &'a str,
    overrides: &'a ChannelOverrides,
    platform: Platform,
) -> &'a str {
    match overrides.get(&platform) {
        Some(o) if o.use_custom_content => &o.content,
        _ => content,
    }
}

/// One (post, sub-account) publishing unit.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostTarget {
    pub id: i64,
    pub post_id: i64,
    pub sub_account_id: Option<i64>,
    pub platform: Platform,
    pub account_name: String,
    pub status: PostStatus,
    pub published_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub platform_post_id: Option<String>,
    pub error: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub retry_count: i64,
    #[serde(skip_serializing)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An uploaded image or video.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Media {
    pub id: i64,
    pub owner: String,
    pub kind: MediaKind,
    #[serde(skip_serializing)]
    pub file_name: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size_bytes: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// Pending OAuth authorization, consumed by the callback.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OAuthState {
    pub state: String,
    pub owner: String,
    pub platform: Platform,
    pub code_verifier: String,
    pub frontend_origin: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data for inserting a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: String,
    pub platform: Platform,
    pub external_user_id: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// Data for inserting a new sub-account.
#[derive(Debug, Clone)]
pub struct NewSubAccount {
    pub external_id: String,
    pub name: String,
    pub platform: Platform,
    pub follower_count: i64,
    pub can_post: bool,
    pub can_schedule: bool,
    pub can_upload_media: bool,
    pub max_media_count: i64,
    pub max_characters: i64,
    pub access_token: Option<String>,
}

/// Data for inserting a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner: String,
    pub content: String,
    pub channel_overrides: ChannelOverrides,
    pub platform_options: Option<serde_json::Value>,
    pub status: PostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Data for inserting a new target.
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub post_id: i64,
    pub sub_account_id: i64,
    pub platform: Platform,
    pub account_name: String,
    pub status: PostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Data for inserting uploaded media.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub owner: String,
    pub kind: MediaKind,
    pub file_name: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size_bytes: i64,
    pub content_type: String,
}

/// Target counts by status, returned alongside a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetCounts {
    pub total: usize,
    pub draft: usize,
    pub scheduled: usize,
    pub publishing: usize,
    pub published: usize,
    pub failed: usize,
}

impl TargetCounts {
    #[must_use]
    pub fn from_targets(targets: &[PostTarget]) -> Self {
        let mut counts = Self {
            total: targets.len(),
            ..Self::default()
        };
        for target in targets {
            match target.status {
                PostStatus::Draft => counts.draft += 1,
                PostStatus::Scheduled => counts.scheduled += 1,
                PostStatus::Publishing => counts.publishing += 1,
                PostStatus::Published => counts.published += 1,
                PostStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// A post with its targets and ordered media for display.
#[derive(Debug, Clone, Serialize)]
pub struct PostWithTargets {
    pub post: Post,
    pub targets: Vec<PostTarget>,
    pub media: Vec<Media>,
    pub target_counts: TargetCounts,
}
