use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::limiter::AccountLimiter;
use super::status::refresh_post_status;
use crate::config::Config;
use crate::constants::AUTO_RETRY_BASE_DELAY_MINUTES;
use crate::db::{
    claim_target, count_stale_claims, get_account, get_due_targets, get_post, get_post_media,
    get_sub_account, set_account_auth_failed, set_target_failed, set_target_published, Database,
    PostTarget,
};
use crate::platforms::{with_timeout, PlatformError, PlatformRegistry, PublishReceipt, PublishRequest};

/// Dispatch worker pool.
pub struct Dispatcher {
    config: Arc<Config>,
    db: Database,
    platforms: Arc<PlatformRegistry>,
    semaphore: Arc<Semaphore>,
    account_limiter: Arc<AccountLimiter>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: Arc<Config>, db: Database, platforms: Arc<PlatformRegistry>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
        let account_limiter = Arc::new(AccountLimiter::new(config.per_account_concurrency));
        Self {
            config,
            db,
            platforms,
            semaphore,
            account_limiter,
        }
    }

    /// Report work interrupted by a previous shutdown.
    ///
    /// Targets left `publishing` are not reset here; once their lease runs
    /// out they become eligible again through the normal queue query.
    pub async fn recover_on_startup(&self, now: DateTime<Utc>) -> Result<()> {
        let stale = count_stale_claims(self.db.pool(), self.lease_cutoff(now)).await?;
        if stale > 0 {
            info!(count = stale, "Re-queueing targets abandoned mid-dispatch");
        }
        Ok(())
    }

    /// Run the dispatch loop until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            workers = self.config.worker_concurrency,
            per_account = self.config.per_account_concurrency,
            poll_ms = self.config.dispatch_poll_interval.as_millis() as u64,
            "Starting dispatcher"
        );

        let mut interval = tokio::time::interval(self.config.dispatch_poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(count) => {
                            if count > 0 {
                                debug!(count, "Dispatched due targets");
                            }
                        }
                        Err(e) => {
                            error!("Error dispatching due targets: {e:#}");
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Dispatch every target due at `now`. Returns how many this call
    /// claimed and attempted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let started = Instant::now();
        let lease_cutoff = self.lease_cutoff(now);
        let batch = (self.config.worker_concurrency.max(1) * 4) as i64;
        let due = get_due_targets(self.db.pool(), now, lease_cutoff, batch).await?;

        let mut handles = Vec::with_capacity(due.len());
        for target in due {
            let permit = self.semaphore.clone().acquire_owned().await?;
            let db = self.db.clone();
            let config = Arc::clone(&self.config);
            let platforms = Arc::clone(&self.platforms);
            let account_limiter = Arc::clone(&self.account_limiter);

            handles.push(tokio::spawn(async move {
                let _global_permit = permit;

                // Hold the account permit before claiming so a claim is never
                // left waiting on another target of the same account.
                let account_id = match target.sub_account_id {
                    Some(id) => get_sub_account(db.pool(), id)
                        .await
                        .ok()
                        .flatten()
                        .map(|s| s.account_id),
                    None => None,
                };
                let _account_permit = match account_id {
                    Some(id) => account_limiter.acquire(id).await,
                    None => None,
                };

                match claim_target(db.pool(), target.id, now, lease_cutoff).await {
                    Ok(true) => {
                        if let Err(e) = project_claim(&db, &target, now).await {
                            warn!(target_id = target.id, "Failed to project claimed post: {e:#}");
                        }
                        dispatch_target(&db, &platforms, &config, &target, now, started).await;
                        true
                    }
                    Ok(false) => {
                        debug!(target_id = target.id, "Target claimed elsewhere, skipping");
                        false
                    }
                    Err(e) => {
                        error!(target_id = target.id, "Failed to claim target: {e:#}");
                        false
                    }
                }
            }));
        }

        let mut dispatched = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => error!("Dispatch task panicked: {e}"),
            }
        }
        self.account_limiter.prune_idle().await;

        Ok(dispatched)
    }

    fn lease_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::from_std(self.config.dispatch_lease).unwrap_or_else(|_| Duration::minutes(5))
    }
}

/// The batch time advanced by the time spent waiting and publishing.
fn finished_at(claimed_at: DateTime<Utc>, elapsed: std::time::Duration) -> DateTime<Utc> {
    Duration::from_std(elapsed)
        .ok()
        .and_then(|d| claimed_at.checked_add_signed(d))
        .unwrap_or(claimed_at)
}

/// Delay before the next automatic retry: 5 min × 2^retry_count.
#[must_use]
pub fn retry_delay(retry_count: i64) -> Duration {
    let exponent = u32::try_from(retry_count.clamp(0, 16)).unwrap_or(16);
    Duration::minutes(AUTO_RETRY_BASE_DELAY_MINUTES * 2_i64.pow(exponent))
}

/// Show the post as publishing as soon as one of its targets is claimed.
async fn project_claim(db: &Database, target: &PostTarget, now: DateTime<Utc>) -> Result<()> {
    let mut tx = db.pool().begin().await?;
    refresh_post_status(&mut tx, target.post_id, now).await?;
    tx.commit().await?;
    Ok(())
}

/// Publish one claimed target and record the outcome.
///
/// Failures are recorded on the target and never propagate; one target's
/// failure does not affect its siblings. `claimed_at` stays the fencing
/// token; the outcome is stamped with the time the publish finished.
async fn dispatch_target(
    db: &Database,
    platforms: &PlatformRegistry,
    config: &Config,
    target: &PostTarget,
    claimed_at: DateTime<Utc>,
    started: Instant,
) {
    let outcome = publish(db, platforms, config, target).await;
    let now = finished_at(claimed_at, started.elapsed());

    let recorded = match &outcome {
        Ok(receipt) => record_success(db, target, claimed_at, receipt, now).await,
        Err((e, account_id)) => {
            record_failure(db, config, target, claimed_at, e, *account_id, now).await
        }
    };

    if let Err(e) = recorded {
        error!(target_id = target.id, "Failed to record dispatch outcome: {e:#}");
    }
}

async fn record_success(
    db: &Database,
    target: &PostTarget,
    claimed_at: DateTime<Utc>,
    receipt: &PublishReceipt,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = db.pool().begin().await?;
    let applied = set_target_published(
        &mut *tx,
        target.id,
        claimed_at,
        &receipt.url,
        &receipt.platform_post_id,
        now,
    )
    .await?;
    if applied {
        refresh_post_status(&mut tx, target.post_id, now).await?;
    }
    tx.commit().await?;

    if applied {
        info!(
            target_id = target.id,
            post_id = target.post_id,
            platform = %target.platform,
            url = %receipt.url,
            "Target published"
        );
    } else {
        warn!(target_id = target.id, "Published, but the claim was lost before recording");
    }
    Ok(())
}

async fn record_failure(
    db: &Database,
    config: &Config,
    target: &PostTarget,
    claimed_at: DateTime<Utc>,
    error: &PlatformError,
    account_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<()> {
    let message = error.to_string();
    let next_attempt_at = (!error.is_auth() && target.retry_count < config.auto_retry_max)
        .then(|| now + retry_delay(target.retry_count));

    let mut tx = db.pool().begin().await?;
    let applied = set_target_failed(
        &mut *tx,
        target.id,
        claimed_at,
        &message,
        next_attempt_at,
        now,
    )
    .await?;
    if applied {
        refresh_post_status(&mut tx, target.post_id, now).await?;
    }
    tx.commit().await?;

    warn!(
        target_id = target.id,
        post_id = target.post_id,
        platform = %target.platform,
        retry_count = target.retry_count + 1,
        auto_retry_at = ?next_attempt_at,
        error = %message,
        "Target failed"
    );

    if error.is_auth() {
        if let Some(account_id) = account_id {
            if set_account_auth_failed(db.pool(), account_id, &message, now).await? {
                warn!(account_id, "Account token rejected, status set to error");
            }
        }
    }
    Ok(())
}

/// Resolve everything the platform call needs and make it under the
/// publish timeout. The error side carries the account id when known.
async fn publish(
    db: &Database,
    platforms: &PlatformRegistry,
    config: &Config,
    target: &PostTarget,
) -> Result<PublishReceipt, (PlatformError, Option<i64>)> {
    let unavailable = |msg: String| (PlatformError::Unavailable(msg), None);
    let internal = |e: anyhow::Error| (PlatformError::Unavailable(format!("{e:#}")), None);

    let sub_account_id = target
        .sub_account_id
        .ok_or_else(|| unavailable("target account was disconnected".to_string()))?;
    let sub_account = get_sub_account(db.pool(), sub_account_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| unavailable(format!("sub-account {sub_account_id} no longer exists")))?;
    let account = get_account(db.pool(), sub_account.account_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| unavailable(format!("account {} no longer exists", sub_account.account_id)))?;
    let post = get_post(db.pool(), target.post_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| unavailable(format!("post {} no longer exists", target.post_id)))?;
    let media = get_post_media(db.pool(), post.id).await.map_err(internal)?;

    let client = platforms.require(target.platform).map_err(|e| (e, None))?;
    let access_token = sub_account
        .access_token
        .as_deref()
        .unwrap_or(&account.access_token);
    let options = post.platform_options.as_ref().map(|o| &o.0);

    let request = PublishRequest {
        platform: target.platform,
        external_id: &sub_account.external_id,
        access_token,
        content: post.effective_content(target.platform),
        media: &media,
        options,
    };

    debug!(
        target_id = target.id,
        platform = %target.platform,
        sub_account = %sub_account.name,
        media = media.len(),
        "Publishing target"
    );

    with_timeout(config.publish_timeout, client.publish(&request))
        .await
        .map_err(|e| (e, Some(account.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(0), Duration::minutes(5));
        assert_eq!(retry_delay(1), Duration::minutes(10));
        assert_eq!(retry_delay(3), Duration::minutes(40));
    }

    #[test]
    fn test_finished_at_adds_publish_time() {
        let claimed_at = Utc::now();
        assert_eq!(
            finished_at(claimed_at, std::time::Duration::from_secs(30)),
            claimed_at + Duration::seconds(30)
        );
        assert_eq!(finished_at(claimed_at, std::time::Duration::ZERO), claimed_at);
    }
}
