//! Post fan-out: one target per selected sub-account, queued at its due time.

mod validate;

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use crate::db::{
    delete_post, delete_target, get_available_accounts_by_ids, get_media_by_ids, get_post,
    get_post_media, get_targets_for_post, insert_post, insert_target, list_posts,
    reschedule_target, set_post_media, update_post_fields, AvailableAccount, ChannelOverrides,
    Database, Media, NewPost, NewTarget, Platform, Post, PostFilter, PostStatus, PostTarget,
    PostWithTargets, TargetCounts,
};
use crate::constants::MAX_PAGE_SIZE;
use crate::dispatcher::refresh_post_status;
use crate::error::{ServiceError, ServiceResult};
use crate::platforms::capabilities;
use validate::{dedup_ids, resolve_media, resolve_targets, validate_content};

/// Body of `POST /posts` and `PUT /posts/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostRequest {
    pub content: String,
    #[serde(default)]
    pub media_ids: Vec<i64>,
    #[serde(default)]
    pub target_account_ids: Vec<i64>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub platform_options: Option<serde_json::Value>,
    #[serde(default)]
    pub channel_overrides: ChannelOverrides,
    /// Save without queueing anything.
    #[serde(default)]
    pub draft: bool,
}

/// A page of posts.
#[derive(Debug, Clone, Serialize)]
pub struct PostPage {
    pub posts: Vec<PostWithTargets>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

struct Validated {
    targets: Vec<AvailableAccount>,
    media_ids: Vec<i64>,
}

/// Status and due time for every target of a post being saved.
fn target_plan(
    draft: bool,
    scheduled_for: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (PostStatus, Option<DateTime<Utc>>) {
    if draft {
        (PostStatus::Draft, None)
    } else if let Some(at) = scheduled_for {
        (PostStatus::Scheduled, Some(at))
    } else {
        (PostStatus::Publishing, Some(now))
    }
}

#[derive(Clone)]
pub struct FanoutScheduler {
    db: Database,
}

impl FanoutScheduler {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a post and one queued target per selected sub-account.
    pub async fn create_post(
        &self,
        owner: &str,
        request: PostRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<PostWithTargets> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let validated = validate_request(&mut tx, owner, &request, now).await?;
        let (status, next_attempt_at) = target_plan(request.draft, request.scheduled_for, now);

        let post_id = insert_post(
            &mut *tx,
            &NewPost {
                owner: owner.to_string(),
                content: request.content,
                channel_overrides: request.channel_overrides,
                platform_options: request.platform_options,
                status,
                scheduled_for: request.scheduled_for,
            },
            now,
        )
        .await?;
        set_post_media(&mut tx, post_id, &validated.media_ids).await?;

        for account in &validated.targets {
            insert_target(
                &mut *tx,
                &NewTarget {
                    post_id,
                    sub_account_id: account.id,
                    platform: account.platform,
                    account_name: account.name.clone(),
                    status,
                    scheduled_for: request.scheduled_for,
                    next_attempt_at,
                },
                now,
            )
            .await?;
        }
        refresh_post_status(&mut tx, post_id, now).await?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            post_id,
            owner,
            targets = validated.targets.len(),
            status = status.as_str(),
            scheduled_for = ?request.scheduled_for,
            "Post created"
        );
        self.get_post(owner, post_id).await
    }

    /// Replace a draft or scheduled post's content, media, options and
    /// schedule, and reconcile its targets with the new selection.
    pub async fn update_post(
        &self,
        owner: &str,
        post_id: i64,
        request: PostRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<PostWithTargets> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let post = get_post(&mut *tx, post_id)
            .await?
            .filter(|p| p.owner == owner)
            .ok_or_else(|| ServiceError::not_found(format!("post {post_id}")))?;
        if !post.status.is_editable() {
            return Err(ServiceError::PostNotEditable(post_id));
        }
        // The stored status lags a fresh claim; the targets are authoritative.
        let existing = get_targets_for_post(&mut *tx, post_id).await?;
        if existing.iter().any(|t| !t.status.is_editable()) {
            return Err(ServiceError::PostNotEditable(post_id));
        }

        let validated = validate_request(&mut tx, owner, &request, now).await?;
        let (status, next_attempt_at) = target_plan(request.draft, request.scheduled_for, now);

        update_post_fields(
            &mut *tx,
            post_id,
            &request.content,
            &request.channel_overrides,
            request.platform_options.as_ref(),
            request.scheduled_for,
            now,
        )
        .await?;
        set_post_media(&mut tx, post_id, &validated.media_ids).await?;

        let selected: HashSet<i64> = validated.targets.iter().map(|a| a.id).collect();
        let mut kept = HashSet::new();
        let mut removed = 0;
        for target in &existing {
            match target.sub_account_id {
                Some(id) if selected.contains(&id) && kept.insert(id) => {
                    let rescheduled = reschedule_target(
                        &mut *tx,
                        target.id,
                        status,
                        request.scheduled_for,
                        next_attempt_at,
                        now,
                    )
                    .await?;
                    if !rescheduled {
                        return Err(ServiceError::PostNotEditable(post_id));
                    }
                }
                _ => {
                    if !delete_target(&mut *tx, target.id).await? {
                        return Err(ServiceError::PostNotEditable(post_id));
                    }
                    removed += 1;
                }
            }
        }

        let mut added = 0;
        for account in validated.targets.iter().filter(|a| !kept.contains(&a.id)) {
            insert_target(
                &mut *tx,
                &NewTarget {
                    post_id,
                    sub_account_id: account.id,
                    platform: account.platform,
                    account_name: account.name.clone(),
                    status,
                    scheduled_for: request.scheduled_for,
                    next_attempt_at,
                },
                now,
            )
            .await?;
            added += 1;
        }
        refresh_post_status(&mut tx, post_id, now).await?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            post_id,
            kept = kept.len(),
            added,
            removed,
            status = status.as_str(),
            "Post updated"
        );
        self.get_post(owner, post_id).await
    }

    /// Delete a post and its targets.
    ///
    /// A post live on a platform that cannot delete remotely needs
    /// `confirm`; without it nothing changes.
    pub async fn delete_post(&self, owner: &str, post_id: i64, confirm: bool) -> ServiceResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        get_post(&mut *tx, post_id)
            .await?
            .filter(|p| p.owner == owner)
            .ok_or_else(|| ServiceError::not_found(format!("post {post_id}")))?;

        let targets = get_targets_for_post(&mut *tx, post_id).await?;
        if targets.iter().any(|t| t.status == PostStatus::Publishing) {
            return Err(ServiceError::conflict(
                "post is being published and cannot be deleted right now",
            ));
        }

        if !confirm {
            let stranded = stranded_platforms(&targets);
            if !stranded.is_empty() {
                return Err(ServiceError::ExternalDeleteUnsupported {
                    platforms: stranded,
                });
            }
        }

        delete_post(&mut *tx, post_id).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(post_id, owner, targets = targets.len(), "Post deleted");
        Ok(())
    }

    /// A post of the owner with its targets and media.
    pub async fn get_post(&self, owner: &str, post_id: i64) -> ServiceResult<PostWithTargets> {
        let post = get_post(self.db.pool(), post_id)
            .await?
            .filter(|p| p.owner == owner)
            .ok_or_else(|| ServiceError::not_found(format!("post {post_id}")))?;
        self.with_targets(post).await
    }

    /// List the owner's posts with filters and pagination.
    pub async fn list_posts(&self, owner: &str, filter: &PostFilter) -> ServiceResult<PostPage> {
        let (posts, total) = list_posts(self.db.pool(), owner, filter).await?;
        let mut page = Vec::with_capacity(posts.len());
        for post in posts {
            page.push(self.with_targets(post).await?);
        }
        Ok(PostPage {
            posts: page,
            total,
            page: filter.page.max(1),
            per_page: filter.per_page.clamp(1, MAX_PAGE_SIZE),
        })
    }

    async fn with_targets(&self, post: Post) -> ServiceResult<PostWithTargets> {
        let targets = get_targets_for_post(self.db.pool(), post.id).await?;
        let media = get_post_media(self.db.pool(), post.id).await?;
        Ok(PostWithTargets {
            target_counts: TargetCounts::from_targets(&targets),
            post,
            targets,
            media,
        })
    }
}

/// Platforms where a published target would survive a local delete.
fn stranded_platforms(targets: &[PostTarget]) -> Vec<Platform> {
    let platforms: BTreeSet<Platform> = targets
        .iter()
        .filter(|t| t.status == PostStatus::Published && !capabilities(t.platform).remote_delete)
        .map(|t| t.platform)
        .collect();
    platforms.into_iter().collect()
}

async fn validate_request(
    conn: &mut SqliteConnection,
    owner: &str,
    request: &PostRequest,
    now: DateTime<Utc>,
) -> ServiceResult<Validated> {
    let target_ids = dedup_ids(&request.target_account_ids);
    let found = get_available_accounts_by_ids(&mut *conn, owner, &target_ids).await?;
    let targets = resolve_targets(&target_ids, found)?;

    let found_media = get_media_by_ids(&mut *conn, owner, &dedup_ids(&request.media_ids)).await?;
    let media: Vec<Media> = resolve_media(&request.media_ids, found_media)?;

    let platforms: BTreeSet<Platform> = targets.iter().map(|a| a.platform).collect();
    validate_content(
        &request.content,
        &request.channel_overrides,
        media.len(),
        &platforms,
        request.scheduled_for,
        now,
    )?;

    Ok(Validated {
        targets,
        media_ids: media.iter().map(|m| m.id).collect(),
    })
}
