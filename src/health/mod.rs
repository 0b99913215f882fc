//! Token health: expiry-driven account status and token refresh.

mod locks;
mod refresh;

pub use refresh::{RefreshResult, TokenRefresher};

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constants::OAUTH_STATE_TTL_MINUTES;
use crate::db::{
    delete_expired_oauth_states, list_monitored_accounts, transition_account_status, Account,
    AccountStatus, Database, Platform,
};
use crate::platforms::capabilities;

/// How long before expiry an account enters `warning`.
///
/// Platforms with a fixed window use it; others use `fraction` of the
/// token lifetime (expiry minus last refresh).
#[must_use]
pub fn warning_window(
    platform: Platform,
    last_refreshed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    fraction: f64,
) -> Duration {
    if let Some(window) = capabilities(platform).warning_window() {
        return window;
    }
    let lifetime = expires_at - last_refreshed_at;
    if lifetime <= Duration::zero() {
        return Duration::zero();
    }
    Duration::milliseconds((lifetime.num_milliseconds() as f64 * fraction) as i64)
}

/// Status implied by the token expiry alone, ignoring the current status.
#[must_use]
pub fn expiry_status(account: &Account, now: DateTime<Utc>, fraction: f64) -> AccountStatus {
    let Some(expires_at) = account.token_expires_at else {
        return AccountStatus::Healthy;
    };
    if expires_at <= now {
        AccountStatus::Error
    } else if expires_at - now
        <= warning_window(account.platform, account.last_refreshed_at, expires_at, fraction)
    {
        AccountStatus::Warning
    } else {
        AccountStatus::Healthy
    }
}

/// The status an account should have at `now`.
///
/// Only moves forward: a periodic check never makes an account healthier.
#[must_use]
pub fn evaluate(account: &Account, now: DateTime<Utc>, fraction: f64) -> AccountStatus {
    account.status.max(expiry_status(account, now, fraction))
}

/// Outcome of one health pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub checked: usize,
    pub warned: usize,
    pub errored: usize,
}

/// Periodic token expiry checker.
pub struct TokenHealthMonitor {
    db: Database,
    config: Arc<Config>,
}

impl TokenHealthMonitor {
    #[must_use]
    pub fn new(db: Database, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    /// Evaluate every account that is not disconnected and persist forward
    /// transitions.
    pub async fn check_all(&self, now: DateTime<Utc>) -> Result<CheckSummary> {
        let accounts = list_monitored_accounts(self.db.pool()).await?;
        let mut summary = CheckSummary {
            checked: accounts.len(),
            ..CheckSummary::default()
        };

        for account in &accounts {
            let next = evaluate(account, now, self.config.token_warning_fraction);
            if next == account.status {
                continue;
            }

            let error = (next == AccountStatus::Error).then_some("token expired");
            // Compare-and-set: a refresh that landed since the read wins.
            let moved = transition_account_status(
                self.db.pool(),
                account.id,
                account.status,
                next,
                error,
                now,
            )
            .await?;
            if !moved {
                debug!(account_id = account.id, "Account changed during check, skipping");
                continue;
            }

            match next {
                AccountStatus::Warning => {
                    summary.warned += 1;
                    info!(
                        account_id = account.id,
                        platform = %account.platform,
                        expires_at = ?account.token_expires_at,
                        "Token expiring soon"
                    );
                }
                AccountStatus::Error => {
                    summary.errored += 1;
                    warn!(
                        account_id = account.id,
                        platform = %account.platform,
                        "Token expired"
                    );
                }
                AccountStatus::Healthy | AccountStatus::Disconnected => {}
            }
        }

        Ok(summary)
    }

    /// Run the monitor until cancelled. Checks immediately, then on the
    /// configured interval; abandoned OAuth states are swept on each pass.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.health_check_interval.as_secs(),
            warning_fraction = self.config.token_warning_fraction,
            "Starting token health monitor"
        );

        let mut interval = tokio::time::interval(self.config.health_check_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_pass(Utc::now()).await;
                }
                () = shutdown.cancelled() => {
                    info!("Token health monitor shutting down");
                    break;
                }
            }
        }
    }

    async fn run_pass(&self, now: DateTime<Utc>) {
        match self.check_all(now).await {
            Ok(summary) => {
                if summary.warned > 0 || summary.errored > 0 {
                    info!(
                        checked = summary.checked,
                        warned = summary.warned,
                        errored = summary.errored,
                        "Token health check complete"
                    );
                }
            }
            Err(e) => error!("Token health check failed: {e:#}"),
        }

        let cutoff = now - Duration::minutes(OAUTH_STATE_TTL_MINUTES);
        match delete_expired_oauth_states(self.db.pool(), cutoff).await {
            Ok(count) if count > 0 => debug!(count, "Deleted expired OAuth states"),
            Ok(_) => {}
            Err(e) => error!("Failed to delete expired OAuth states: {e:#}"),
        }
    }
}
