use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use super::models::{
    Account, AccountStatus, AvailableAccount, ChannelOverrides, Media, NewAccount, NewMedia,
    NewPost, NewSubAccount, NewTarget, OAuthState, Platform, Post, PostStatus, PostTarget,
    SubAccount,
};
use super::ts;
use crate::constants::MAX_PAGE_SIZE;

// ========== Accounts ==========

/// Insert a newly connected account.
pub async fn insert_account<'e, E>(executor: E, account: &NewAccount, now: DateTime<Utc>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r"
        INSERT INTO accounts (
            owner, platform, external_user_id, display_name, access_token, refresh_token,
            token_expires_at, status, connected_at, last_refreshed_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, 'healthy', ?, ?, ?)
        RETURNING id
        ",
    )
    .bind(&account.owner)
    .bind(account.platform)
    .bind(&account.external_user_id)
    .bind(&account.display_name)
    .bind(&account.access_token)
    .bind(&account.refresh_token)
    .bind(account.token_expires_at.map(ts))
    .bind(ts(now))
    .bind(ts(now))
    .bind(ts(now))
    .fetch_one(executor)
    .await
    .context("Failed to insert account")
}

/// Get an account by ID.
pub async fn get_account<'e, E>(executor: E, id: i64) -> Result<Option<Account>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch account")
}

/// Find an account by its platform identity for one owner.
pub async fn find_account_by_identity<'e, E>(
    executor: E,
    owner: &str,
    platform: Platform,
    external_user_id: &str,
) -> Result<Option<Account>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        "SELECT * FROM accounts WHERE owner = ? AND platform = ? AND external_user_id = ?",
    )
    .bind(owner)
    .bind(platform)
    .bind(external_user_id)
    .fetch_optional(executor)
    .await
    .context("Failed to fetch account by identity")
}

/// List all accounts of an owner, including disconnected ones.
pub async fn list_accounts(pool: &SqlitePool, owner: &str) -> Result<Vec<Account>> {
    sqlx::query_as("SELECT * FROM accounts WHERE owner = ? ORDER BY platform, display_name, id")
        .bind(owner)
        .fetch_all(pool)
        .await
        .context("Failed to list accounts")
}

/// List every account whose token health is tracked (not disconnected).
pub async fn list_monitored_accounts(pool: &SqlitePool) -> Result<Vec<Account>> {
    sqlx::query_as("SELECT * FROM accounts WHERE status != 'disconnected' ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to list monitored accounts")
}

/// Replace the tokens of a previously disconnected identity and mark it healthy.
pub async fn reconnect_account<'e, E>(
    executor: E,
    id: i64,
    account: &NewAccount,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"
        UPDATE accounts
        SET display_name = ?,
            access_token = ?,
            refresh_token = ?,
            token_expires_at = ?,
            status = 'healthy',
            last_error = NULL,
            connected_at = ?,
            last_refreshed_at = ?,
            updated_at = ?
        WHERE id = ?
        ",
    )
    .bind(&account.display_name)
    .bind(&account.access_token)
    .bind(&account.refresh_token)
    .bind(account.token_expires_at.map(ts))
    .bind(ts(now))
    .bind(ts(now))
    .bind(ts(now))
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to reconnect account")?;

    Ok(())
}

/// Store refreshed tokens and return the account to healthy.
///
/// A `None` refresh token keeps the stored one (platforms that do not rotate it).
/// A disconnected account is left untouched; returns whether the tokens were stored.
pub async fn update_account_tokens<'e, E>(
    executor: E,
    id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    token_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"
        UPDATE accounts
        SET access_token = ?,
            refresh_token = COALESCE(?, refresh_token),
            token_expires_at = ?,
            status = 'healthy',
            last_error = NULL,
            last_refreshed_at = ?,
            updated_at = ?
        WHERE id = ? AND status != 'disconnected'
        ",
    )
    .bind(access_token)
    .bind(refresh_token)
    .bind(token_expires_at.map(ts))
    .bind(ts(now))
    .bind(ts(now))
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to update account tokens")?;

    Ok(result.rows_affected() > 0)
}

/// Move an account from `from` to `to`, only if it is still in `from`.
///
/// Returns whether the transition happened.
pub async fn transition_account_status(
    pool: &SqlitePool,
    id: i64,
    from: AccountStatus,
    to: AccountStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE accounts
        SET status = ?,
            last_error = COALESCE(?, last_error),
            updated_at = ?
        WHERE id = ? AND status = ?
        ",
    )
    .bind(to)
    .bind(error)
    .bind(ts(now))
    .bind(id)
    .bind(from)
    .execute(pool)
    .await
    .context("Failed to transition account status")?;

    Ok(result.rows_affected() > 0)
}

/// Move a live account to `error` after the platform rejected its token.
pub async fn set_account_auth_failed(
    pool: &SqlitePool,
    id: i64,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE accounts
        SET status = 'error', last_error = ?, updated_at = ?
        WHERE id = ? AND status IN ('healthy', 'warning')
        ",
    )
    .bind(error)
    .bind(ts(now))
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark account auth failure")?;

    Ok(result.rows_affected() > 0)
}

/// Record the last token error without touching status.
pub async fn set_account_last_error(
    pool: &SqlitePool,
    id: i64,
    error: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE accounts SET last_error = ?, updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(ts(now))
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to set account error")?;

    Ok(())
}

/// Mark an account and its sub-accounts disconnected.
pub async fn mark_account_disconnected(
    conn: &mut SqliteConnection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE accounts SET status = 'disconnected', updated_at = ? WHERE id = ?")
        .bind(ts(now))
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to mark account disconnected")?;

    sqlx::query("UPDATE sub_accounts SET status = 'disconnected' WHERE account_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to mark sub-accounts disconnected")?;

    Ok(())
}

// ========== Sub-accounts ==========

/// Insert a sub-account, or refresh it when the same page is rediscovered on reconnect.
pub async fn upsert_sub_account<'e, E>(
    executor: E,
    account_id: i64,
    sub: &NewSubAccount,
    now: DateTime<Utc>,
) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r"
        INSERT INTO sub_accounts (
            account_id, external_id, name, platform, follower_count, can_post, can_schedule,
            can_upload_media, max_media_count, max_characters, status, access_token, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'healthy', ?, ?)
        ON CONFLICT (account_id, external_id) DO UPDATE SET
            name = excluded.name,
            follower_count = excluded.follower_count,
            can_post = excluded.can_post,
            can_schedule = excluded.can_schedule,
            can_upload_media = excluded.can_upload_media,
            max_media_count = excluded.max_media_count,
            max_characters = excluded.max_characters,
            status = 'healthy',
            access_token = excluded.access_token
        RETURNING id
        ",
    )
    .bind(account_id)
    .bind(&sub.external_id)
    .bind(&sub.name)
    .bind(sub.platform)
    .bind(sub.follower_count)
    .bind(sub.can_post)
    .bind(sub.can_schedule)
    .bind(sub.can_upload_media)
    .bind(sub.max_media_count)
    .bind(sub.max_characters)
    .bind(&sub.access_token)
    .bind(ts(now))
    .fetch_one(executor)
    .await
    .context("Failed to upsert sub-account")
}

/// Get a sub-account by ID.
pub async fn get_sub_account<'e, E>(executor: E, id: i64) -> Result<Option<SubAccount>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM sub_accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch sub-account")
}

/// List the sub-accounts of one account.
pub async fn list_sub_accounts<'e, E>(executor: E, account_id: i64) -> Result<Vec<SubAccount>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM sub_accounts WHERE account_id = ? ORDER BY id")
        .bind(account_id)
        .fetch_all(executor)
        .await
        .context("Failed to list sub-accounts")
}

/// List every sub-account of an owner, used by the aggregation snapshot.
pub async fn list_sub_accounts_for_owner(pool: &SqlitePool, owner: &str) -> Result<Vec<SubAccount>> {
    sqlx::query_as(
        r"
        SELECT s.* FROM sub_accounts s
        JOIN accounts a ON a.id = s.account_id
        WHERE a.owner = ?
        ORDER BY s.id
        ",
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .context("Failed to list sub-accounts for owner")
}

const AVAILABLE_SELECT: &str = r"
    SELECT s.id, s.account_id, s.external_id, s.name, s.platform, s.follower_count,
           s.can_post, s.can_schedule, s.can_upload_media, s.max_media_count,
           s.max_characters, s.status, a.status AS parent_status, a.display_name AS parent_name
    FROM sub_accounts s
    JOIN accounts a ON a.id = s.account_id
    WHERE a.owner = ";

/// List an owner's sub-accounts with the parent status folded into `status`.
pub async fn list_available_accounts(
    pool: &SqlitePool,
    owner: &str,
    platform: Option<Platform>,
) -> Result<Vec<AvailableAccount>> {
    let mut qb = QueryBuilder::<Sqlite>::new(AVAILABLE_SELECT);
    qb.push_bind(owner);
    if let Some(platform) = platform {
        qb.push(" AND s.platform = ").push_bind(platform);
    }
    qb.push(" ORDER BY s.platform, s.name, s.id");

    let rows: Vec<AvailableAccount> = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("Failed to list available accounts")?;

    Ok(rows.into_iter().map(fold_parent_status).collect())
}

/// Fetch the given sub-accounts of an owner with their parent status.
///
/// Ids that do not exist or belong to another owner are simply absent.
pub async fn get_available_accounts_by_ids<'e, E>(
    executor: E,
    owner: &str,
    ids: &[i64],
) -> Result<Vec<AvailableAccount>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(AVAILABLE_SELECT);
    qb.push_bind(owner);
    qb.push(" AND s.id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let rows: Vec<AvailableAccount> = qb
        .build_query_as()
        .fetch_all(executor)
        .await
        .context("Failed to fetch target accounts")?;

    Ok(rows.into_iter().map(fold_parent_status).collect())
}

fn fold_parent_status(mut row: AvailableAccount) -> AvailableAccount {
    row.status = row.status.max(row.parent_status);
    row
}

/// Delete all sub-accounts of an account. Targets keep their history with a
/// NULL sub-account reference.
pub async fn delete_sub_accounts<'e, E>(executor: E, account_id: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM sub_accounts WHERE account_id = ?")
        .bind(account_id)
        .execute(executor)
        .await
        .context("Failed to delete sub-accounts")?;

    Ok(result.rows_affected())
}

// ========== Posts ==========

/// Insert a new post.
pub async fn insert_post<'e, E>(executor: E, post: &NewPost, now: DateTime<Utc>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r"
        INSERT INTO posts (
            owner, content, channel_overrides, platform_options, status, scheduled_for,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        ",
    )
    .bind(&post.owner)
    .bind(&post.content)
    .bind(Json(&post.channel_overrides))
    .bind(post.platform_options.as_ref().map(Json))
    .bind(post.status)
    .bind(post.scheduled_for.map(ts))
    .bind(ts(now))
    .bind(ts(now))
    .fetch_one(executor)
    .await
    .context("Failed to insert post")
}

/// Get a post by ID.
pub async fn get_post<'e, E>(executor: E, id: i64) -> Result<Option<Post>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch post")
}

/// Replace the editable fields of a post.
pub async fn update_post_fields<'e, E>(
    executor: E,
    id: i64,
    content: &str,
    channel_overrides: &ChannelOverrides,
    platform_options: Option<&serde_json::Value>,
    scheduled_for: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"
        UPDATE posts
        SET content = ?,
            channel_overrides = ?,
            platform_options = ?,
            scheduled_for = ?,
            updated_at = ?
        WHERE id = ?
        ",
    )
    .bind(content)
    .bind(Json(channel_overrides))
    .bind(platform_options.map(Json))
    .bind(scheduled_for.map(ts))
    .bind(ts(now))
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to update post")?;

    Ok(())
}

/// Store the projected post status.
///
/// `published_at` is kept once set so re-projection does not move it.
pub async fn set_post_status<'e, E>(
    executor: E,
    id: i64,
    status: PostStatus,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let published_at = (status == PostStatus::Published).then(|| ts(now));
    sqlx::query(
        r"
        UPDATE posts
        SET status = ?,
            published_at = CASE WHEN ? IS NULL THEN NULL ELSE COALESCE(published_at, ?) END,
            updated_at = ?
        WHERE id = ?
        ",
    )
    .bind(status)
    .bind(&published_at)
    .bind(&published_at)
    .bind(ts(now))
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to set post status")?;

    Ok(())
}

/// Delete a post; targets and media links cascade.
pub async fn delete_post<'e, E>(executor: E, id: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to delete post")?;

    Ok(result.rows_affected())
}

/// Sort column for post listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSort {
    #[default]
    CreatedAt,
    ScheduledFor,
}

/// Filters for `GET /posts`.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub platform: Option<Platform>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: i64,
    pub per_page: i64,
    pub sort: PostSort,
    pub descending: bool,
}

fn push_post_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, owner: &'a str, filter: &'a PostFilter) {
    qb.push_bind(owner);
    if let Some(status) = filter.status {
        qb.push(" AND p.status = ").push_bind(status);
    }
    if let Some(platform) = filter.platform {
        qb.push(" AND EXISTS (SELECT 1 FROM post_targets t WHERE t.post_id = p.id AND t.platform = ")
            .push_bind(platform)
            .push(")");
    }
    if let Some(from) = filter.from {
        qb.push(" AND COALESCE(p.scheduled_for, p.created_at) >= ")
            .push_bind(ts(from));
    }
    if let Some(to) = filter.to {
        qb.push(" AND COALESCE(p.scheduled_for, p.created_at) < ")
            .push_bind(ts(to));
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        qb.push(" AND p.content LIKE ")
            .push_bind(format!("%{}%", escape_like(search.trim())))
            .push(" ESCAPE '\\'");
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// List an owner's posts with filters and pagination. Returns the page and
/// the total number of matching posts.
pub async fn list_posts(
    pool: &SqlitePool,
    owner: &str,
    filter: &PostFilter,
) -> Result<(Vec<Post>, i64)> {
    let per_page = filter.per_page.clamp(1, MAX_PAGE_SIZE);
    let offset = (filter.page.max(1) - 1).saturating_mul(per_page);

    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM posts p WHERE p.owner = ");
    push_post_filters(&mut count_qb, owner, filter);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT p.* FROM posts p WHERE p.owner = ");
    push_post_filters(&mut qb, owner, filter);
    let column = match filter.sort {
        PostSort::CreatedAt => "p.created_at",
        PostSort::ScheduledFor => "COALESCE(p.scheduled_for, p.created_at)",
    };
    let direction = if filter.descending { "DESC" } else { "ASC" };
    qb.push(format!(" ORDER BY {column} {direction}, p.id {direction}"));
    qb.push(" LIMIT ").push_bind(per_page);
    qb.push(" OFFSET ").push_bind(offset);

    let posts = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("Failed to list posts")?;

    Ok((posts, total))
}

/// Every post of an owner, used by the aggregation snapshot.
pub async fn list_all_posts(pool: &SqlitePool, owner: &str) -> Result<Vec<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE owner = ? ORDER BY id")
        .bind(owner)
        .fetch_all(pool)
        .await
        .context("Failed to list posts for owner")
}

// ========== Post media ==========

/// Replace the ordered media list of a post.
pub async fn set_post_media(conn: &mut SqliteConnection, post_id: i64, media_ids: &[i64]) -> Result<()> {
    sqlx::query("DELETE FROM post_media WHERE post_id = ?")
        .bind(post_id)
        .execute(&mut *conn)
        .await
        .context("Failed to clear post media")?;

    for (position, media_id) in media_ids.iter().enumerate() {
        sqlx::query("INSERT INTO post_media (post_id, media_id, position) VALUES (?, ?, ?)")
            .bind(post_id)
            .bind(media_id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await
            .context("Failed to attach media to post")?;
    }

    Ok(())
}

/// Media attached to a post, in order.
pub async fn get_post_media<'e, E>(executor: E, post_id: i64) -> Result<Vec<Media>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r"
        SELECT m.* FROM media m
        JOIN post_media pm ON pm.media_id = m.id
        WHERE pm.post_id = ?
        ORDER BY pm.position
        ",
    )
    .bind(post_id)
    .fetch_all(executor)
    .await
    .context("Failed to fetch post media")
}

// ========== Targets ==========

/// Insert a target row.
pub async fn insert_target<'e, E>(executor: E, target: &NewTarget, now: DateTime<Utc>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r"
        INSERT INTO post_targets (
            post_id, sub_account_id, platform, account_name, status, scheduled_for,
            next_attempt_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        ",
    )
    .bind(target.post_id)
    .bind(target.sub_account_id)
    .bind(target.platform)
    .bind(&target.account_name)
    .bind(target.status)
    .bind(target.scheduled_for.map(ts))
    .bind(target.next_attempt_at.map(ts))
    .bind(ts(now))
    .bind(ts(now))
    .fetch_one(executor)
    .await
    .context("Failed to insert target")
}

/// Get a target by ID.
pub async fn get_target<'e, E>(executor: E, id: i64) -> Result<Option<PostTarget>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM post_targets WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch target")
}

/// All targets of a post.
pub async fn get_targets_for_post<'e, E>(executor: E, post_id: i64) -> Result<Vec<PostTarget>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM post_targets WHERE post_id = ? ORDER BY id")
        .bind(post_id)
        .fetch_all(executor)
        .await
        .context("Failed to fetch targets for post")
}

/// Statuses of a post's targets, the input of the status projection.
pub async fn get_target_statuses<'e, E>(executor: E, post_id: i64) -> Result<Vec<PostStatus>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT status FROM post_targets WHERE post_id = ? ORDER BY id")
        .bind(post_id)
        .fetch_all(executor)
        .await
        .context("Failed to fetch target statuses")
}

/// Delete a target that has not been dispatched yet.
///
/// Returns false when the target is no longer draft or scheduled.
pub async fn delete_target<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "DELETE FROM post_targets WHERE id = ? AND status IN ('draft', 'scheduled')",
    )
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to delete target")?;

    Ok(result.rows_affected() > 0)
}

/// Move a not-yet-dispatched target onto a new schedule.
///
/// Returns false when a worker has claimed the target in the meantime.
pub async fn reschedule_target<'e, E>(
    executor: E,
    id: i64,
    status: PostStatus,
    scheduled_for: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"
        UPDATE post_targets
        SET status = ?, scheduled_for = ?, next_attempt_at = ?, updated_at = ?
        WHERE id = ? AND status IN ('draft', 'scheduled')
        ",
    )
    .bind(status)
    .bind(scheduled_for.map(ts))
    .bind(next_attempt_at.map(ts))
    .bind(ts(now))
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to reschedule target")?;

    Ok(result.rows_affected() > 0)
}

const DUE_CONDITION: &str = r"
    next_attempt_at IS NOT NULL
    AND next_attempt_at <= ?
    AND status IN ('scheduled', 'publishing', 'failed')
    AND (claimed_at IS NULL OR claimed_at <= ?)";

/// Targets whose due time has passed and that no live worker holds.
///
/// `lease_cutoff` is `now - lease`: claims older than that are considered
/// abandoned (the worker died mid-dispatch).
pub async fn get_due_targets(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    lease_cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PostTarget>> {
    sqlx::query_as(&format!(
        "SELECT * FROM post_targets WHERE {DUE_CONDITION} ORDER BY next_attempt_at ASC, id ASC LIMIT ?"
    ))
    .bind(ts(now))
    .bind(ts(lease_cutoff))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch due targets")
}

/// Count targets left `publishing` by a worker whose lease has run out.
pub async fn count_stale_claims(pool: &SqlitePool, lease_cutoff: DateTime<Utc>) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM post_targets WHERE status = 'publishing' AND claimed_at IS NOT NULL AND claimed_at <= ?",
    )
    .bind(ts(lease_cutoff))
    .fetch_one(pool)
    .await
    .context("Failed to count stale claims")
}

/// Claim a due target for dispatch.
///
/// The claim is a single conditional UPDATE; only the caller whose update
/// hit the row may dispatch it.
pub async fn claim_target(
    pool: &SqlitePool,
    id: i64,
    now: DateTime<Utc>,
    lease_cutoff: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(&format!(
        r"
        UPDATE post_targets
        SET status = 'publishing', error = NULL, claimed_at = ?, updated_at = ?
        WHERE id = ? AND {DUE_CONDITION}
        "
    ))
    .bind(ts(now))
    .bind(ts(now))
    .bind(id)
    .bind(ts(now))
    .bind(ts(lease_cutoff))
    .execute(pool)
    .await
    .context("Failed to claim target")?;

    Ok(result.rows_affected() > 0)
}

/// Record a successful publish. Only applies while the caller's claim is current.
pub async fn set_target_published<'e, E>(
    executor: E,
    id: i64,
    claimed_at: DateTime<Utc>,
    published_url: &str,
    platform_post_id: &str,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"
        UPDATE post_targets
        SET status = 'published',
            published_url = ?,
            published_at = ?,
            platform_post_id = ?,
            error = NULL,
            next_attempt_at = NULL,
            claimed_at = NULL,
            updated_at = ?
        WHERE id = ? AND status = 'publishing' AND claimed_at = ?
        ",
    )
    .bind(published_url)
    .bind(ts(now))
    .bind(platform_post_id)
    .bind(ts(now))
    .bind(id)
    .bind(ts(claimed_at))
    .execute(executor)
    .await
    .context("Failed to set target published")?;

    Ok(result.rows_affected() > 0)
}

/// Record a failed publish attempt. `next_attempt_at` re-queues the target
/// for an automatic retry; `None` leaves it for a manual retry.
pub async fn set_target_failed<'e, E>(
    executor: E,
    id: i64,
    claimed_at: DateTime<Utc>,
    error: &str,
    next_attempt_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"
        UPDATE post_targets
        SET status = 'failed',
            error = ?,
            retry_count = retry_count + 1,
            published_url = NULL,
            published_at = NULL,
            next_attempt_at = ?,
            claimed_at = NULL,
            updated_at = ?
        WHERE id = ? AND status = 'publishing' AND claimed_at = ?
        ",
    )
    .bind(error)
    .bind(next_attempt_at.map(ts))
    .bind(ts(now))
    .bind(id)
    .bind(ts(claimed_at))
    .execute(executor)
    .await
    .context("Failed to set target failed")?;

    Ok(result.rows_affected() > 0)
}

/// Put failed targets of a post back on the queue.
///
/// With `ids` only those targets are considered; ids that are not currently
/// failed are left alone. Returns the ids that were re-queued.
pub async fn requeue_failed_targets<'e, E>(
    executor: E,
    post_id: i64,
    ids: Option<&[i64]>,
    now: DateTime<Utc>,
) -> Result<Vec<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut qb = QueryBuilder::<Sqlite>::new(
        "UPDATE post_targets SET status = 'publishing', error = NULL, claimed_at = NULL, next_attempt_at = ",
    );
    qb.push_bind(ts(now));
    qb.push(", updated_at = ").push_bind(ts(now));
    qb.push(" WHERE post_id = ").push_bind(post_id);
    qb.push(" AND status = 'failed'");
    if let Some(ids) = ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }
    qb.push(" RETURNING id");

    let mut retried: Vec<i64> = qb
        .build_query_scalar()
        .fetch_all(executor)
        .await
        .context("Failed to re-queue failed targets")?;
    retried.sort_unstable();
    Ok(retried)
}

/// Delete targets of an account's sub-accounts that have not been sent and
/// are not in flight. Returns the affected post ids.
pub async fn delete_unsent_targets_for_account<'e, E>(executor: E, account_id: i64) -> Result<Vec<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut post_ids: Vec<i64> = sqlx::query_scalar(
        r"
        DELETE FROM post_targets
        WHERE sub_account_id IN (SELECT id FROM sub_accounts WHERE account_id = ?)
          AND status NOT IN ('published', 'publishing')
        RETURNING post_id
        ",
    )
    .bind(account_id)
    .fetch_all(executor)
    .await
    .context("Failed to delete unsent targets")?;

    post_ids.sort_unstable();
    post_ids.dedup();
    Ok(post_ids)
}

/// Every target of an owner's posts, used by the aggregation snapshot.
pub async fn list_targets_for_owner(pool: &SqlitePool, owner: &str) -> Result<Vec<PostTarget>> {
    sqlx::query_as(
        r"
        SELECT t.* FROM post_targets t
        JOIN posts p ON p.id = t.post_id
        WHERE p.owner = ?
        ORDER BY t.id
        ",
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .context("Failed to list targets for owner")
}

// ========== Media ==========

/// Insert uploaded media.
pub async fn insert_media(pool: &SqlitePool, media: &NewMedia, now: DateTime<Utc>) -> Result<i64> {
    sqlx::query_scalar(
        r"
        INSERT INTO media (
            owner, kind, file_name, url, thumbnail_url, width, height, size_bytes,
            content_type, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        ",
    )
    .bind(&media.owner)
    .bind(media.kind)
    .bind(&media.file_name)
    .bind(&media.url)
    .bind(&media.thumbnail_url)
    .bind(media.width)
    .bind(media.height)
    .bind(media.size_bytes)
    .bind(&media.content_type)
    .bind(ts(now))
    .fetch_one(pool)
    .await
    .context("Failed to insert media")
}

/// Get media by ID.
pub async fn get_media(pool: &SqlitePool, id: i64) -> Result<Option<Media>> {
    sqlx::query_as("SELECT * FROM media WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch media")
}

/// Fetch the given media of an owner; foreign or unknown ids are absent.
pub async fn get_media_by_ids<'e, E>(executor: E, owner: &str, ids: &[i64]) -> Result<Vec<Media>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM media WHERE owner = ");
    qb.push_bind(owner);
    qb.push(" AND id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    qb.build_query_as()
        .fetch_all(executor)
        .await
        .context("Failed to fetch media by ids")
}

/// Whether media is attached to a post that may still be dispatched,
/// including failed posts that can be retried.
pub async fn media_in_pending_post(pool: &SqlitePool, media_id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*) FROM post_media pm
        JOIN posts p ON p.id = pm.post_id
        WHERE pm.media_id = ? AND p.status IN ('draft', 'scheduled', 'publishing', 'failed')
        ",
    )
    .bind(media_id)
    .fetch_one(pool)
    .await
    .context("Failed to check media usage")?;

    Ok(count > 0)
}

/// Number of media rows backed by a stored file. Identical uploads share one.
pub async fn count_media_by_file(pool: &SqlitePool, file_name: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM media WHERE file_name = ?")
        .bind(file_name)
        .fetch_one(pool)
        .await
        .context("Failed to count media by file")
}

/// Delete media and detach it from finished posts.
pub async fn delete_media(conn: &mut SqliteConnection, media_id: i64) -> Result<u64> {
    sqlx::query("DELETE FROM post_media WHERE media_id = ?")
        .bind(media_id)
        .execute(&mut *conn)
        .await
        .context("Failed to detach media")?;

    let result = sqlx::query("DELETE FROM media WHERE id = ?")
        .bind(media_id)
        .execute(&mut *conn)
        .await
        .context("Failed to delete media")?;

    Ok(result.rows_affected())
}

// ========== OAuth states ==========

/// Persist a pending OAuth authorization.
pub async fn insert_oauth_state(pool: &SqlitePool, state: &OAuthState) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO oauth_states (state, owner, platform, code_verifier, frontend_origin, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&state.state)
    .bind(&state.owner)
    .bind(state.platform)
    .bind(&state.code_verifier)
    .bind(&state.frontend_origin)
    .bind(ts(state.created_at))
    .execute(pool)
    .await
    .context("Failed to insert OAuth state")?;

    Ok(())
}

/// Consume a pending OAuth authorization. A state can be taken once.
pub async fn take_oauth_state(pool: &SqlitePool, state: &str) -> Result<Option<OAuthState>> {
    sqlx::query_as("DELETE FROM oauth_states WHERE state = ? RETURNING *")
        .bind(state)
        .fetch_optional(pool)
        .await
        .context("Failed to take OAuth state")
}

/// Drop authorizations that were never completed.
pub async fn delete_expired_oauth_states(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM oauth_states WHERE created_at < ?")
        .bind(ts(cutoff))
        .execute(pool)
        .await
        .context("Failed to delete expired OAuth states")?;

    Ok(result.rows_affected())
}
