//! Target dispatch, retry and post status projection.

mod limiter;
mod status;
mod worker;

pub use status::{derive_post_status, refresh_post_status};
pub use worker::{retry_delay, Dispatcher};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::{get_post, requeue_failed_targets, Database};
use crate::error::{ServiceError, ServiceResult};

/// Re-queue failed targets of a post for immediate dispatch.
///
/// With `target_ids` only those targets are retried, and only if they are
/// currently failed; other ids are ignored. Returns the retried ids.
pub async fn retry_post(
    db: &Database,
    owner: &str,
    post_id: i64,
    target_ids: Option<&[i64]>,
    now: DateTime<Utc>,
) -> ServiceResult<Vec<i64>> {
    let mut tx = db.pool().begin().await.map_err(anyhow::Error::from)?;

    get_post(&mut *tx, post_id)
        .await?
        .filter(|p| p.owner == owner)
        .ok_or_else(|| ServiceError::not_found(format!("post {post_id}")))?;

    let retried = requeue_failed_targets(&mut *tx, post_id, target_ids, now).await?;
    if !retried.is_empty() {
        refresh_post_status(&mut tx, post_id, now).await?;
    }

    tx.commit().await.map_err(anyhow::Error::from)?;

    if !retried.is_empty() {
        info!(post_id, targets = ?retried, "Re-queued failed targets");
    }
    Ok(retried)
}
