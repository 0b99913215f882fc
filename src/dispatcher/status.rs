//! Post status as a projection of its targets.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::db::{get_target_statuses, set_post_status, ts, PostStatus};

/// Derive a post's status from its target statuses.
///
/// Rules, first match wins:
/// 1. no targets, or all draft: draft
/// 2. all published: published
/// 3. any publishing: publishing
/// 4. any failed and none scheduled: failed
/// 5. every non-draft target scheduled: scheduled
/// 6. otherwise (some finished, some still waiting): publishing
#[must_use]
pub fn derive_post_status(targets: &[PostStatus]) -> PostStatus {
    let count = |status: PostStatus| targets.iter().filter(|s| **s == status).count();
    let drafts = count(PostStatus::Draft);
    let scheduled = count(PostStatus::Scheduled);

    if targets.len() == drafts {
        PostStatus::Draft
    } else if count(PostStatus::Published) == targets.len() {
        PostStatus::Published
    } else if count(PostStatus::Publishing) > 0 {
        PostStatus::Publishing
    } else if count(PostStatus::Failed) > 0 && scheduled == 0 {
        PostStatus::Failed
    } else if scheduled == targets.len() - drafts {
        PostStatus::Scheduled
    } else {
        PostStatus::Publishing
    }
}

/// Recompute and store a post's status from its targets.
///
/// Run inside a transaction. The post row is written before the targets
/// are read so concurrent recomputations of one post serialize on the
/// SQLite write lock and the last writer sees every committed target.
pub async fn refresh_post_status(
    conn: &mut SqliteConnection,
    post_id: i64,
    now: DateTime<Utc>,
) -> Result<PostStatus> {
    sqlx::query("UPDATE posts SET updated_at = ? WHERE id = ?")
        .bind(ts(now))
        .bind(post_id)
        .execute(&mut *conn)
        .await
        .context("Failed to lock post for status projection")?;

    let statuses = get_target_statuses(&mut *conn, post_id).await?;
    let status = derive_post_status(&statuses);
    set_post_status(&mut *conn, post_id, status, now).await?;

    debug!(post_id, status = status.as_str(), targets = statuses.len(), "Post status projected");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PostStatus::{Draft, Failed, Published, Publishing, Scheduled};

    #[test]
    fn test_precedence_table() {
        let cases: &[(&[PostStatus], PostStatus)] = &[
            (&[], Draft),
            (&[Draft, Draft], Draft),
            (&[Published], Published),
            (&[Published, Published], Published),
            (&[Publishing, Published], Publishing),
            (&[Publishing, Failed], Publishing),
            (&[Publishing, Scheduled], Publishing),
            (&[Failed, Published], Failed),
            (&[Failed], Failed),
            (&[Failed, Scheduled], Publishing),
            (&[Scheduled, Scheduled], Scheduled),
            (&[Scheduled, Draft], Scheduled),
            (&[Published, Scheduled], Publishing),
            (&[Published, Draft], Publishing),
            (&[Failed, Draft], Failed),
        ];

        for (targets, expected) in cases {
            assert_eq!(
                derive_post_status(targets),
                *expected,
                "targets: {targets:?}"
            );
        }
    }

    #[test]
    fn test_derivation_ignores_target_order() {
        let a = [Failed, Published, Scheduled];
        let b = [Scheduled, Failed, Published];
        assert_eq!(derive_post_status(&a), derive_post_status(&b));
    }
}
