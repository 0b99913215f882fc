use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::expiry_status;
use super::locks::AccountLocks;
use crate::accounts::AccountRegistry;
use crate::config::Config;
use crate::db::{
    get_account, set_account_last_error, update_account_tokens, Account, AccountStatus, Database,
    Platform,
};
use crate::error::{ServiceError, ServiceResult, ValidationError};
use crate::platforms::{capabilities, with_timeout, PlatformRegistry, RefreshKind, TokenSet};

/// Result of a refresh request.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub success: bool,
    /// The user must go through the connect flow again.
    pub requires_reauthorization: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

/// Refreshes account tokens, one refresh per account at a time.
#[derive(Clone)]
pub struct TokenRefresher {
    db: Database,
    platforms: Arc<PlatformRegistry>,
    config: Arc<Config>,
    accounts: AccountRegistry,
    locks: Arc<AccountLocks>,
}

impl TokenRefresher {
    #[must_use]
    pub fn new(
        db: Database,
        platforms: Arc<PlatformRegistry>,
        config: Arc<Config>,
        accounts: AccountRegistry,
    ) -> Self {
        Self {
            db,
            platforms,
            config,
            accounts,
            locks: Arc::new(AccountLocks::new()),
        }
    }

    /// Refresh an account's token.
    ///
    /// `threads_only` backs the Threads-specific endpoint and rejects other
    /// platforms.
    pub async fn refresh_token(
        &self,
        owner: &str,
        account_id: i64,
        threads_only: bool,
        now: DateTime<Utc>,
    ) -> ServiceResult<RefreshResult> {
        let result = self.refresh_locked(owner, account_id, threads_only, now).await;
        self.locks.prune_idle().await;
        result
    }

    async fn refresh_locked(
        &self,
        owner: &str,
        account_id: i64,
        threads_only: bool,
        now: DateTime<Utc>,
    ) -> ServiceResult<RefreshResult> {
        let _guard = self.locks.lock(account_id).await;

        // Read under the lock so a refresh that just finished is seen here.
        let account = get_account(self.db.pool(), account_id)
            .await?
            .filter(|a| a.owner == owner)
            .ok_or_else(|| ServiceError::not_found(format!("account {account_id}")))?;

        if threads_only && account.platform != Platform::Threads {
            return Err(ValidationError::invalid(
                "account_id",
                format!("account {account_id} is not a Threads account"),
            )
            .into());
        }
        if account.status == AccountStatus::Disconnected {
            return Err(ServiceError::conflict(
                "account is disconnected; connect it again instead",
            ));
        }
        if account.status == AccountStatus::Healthy
            && expiry_status(&account, now, self.config.token_warning_fraction)
                == AccountStatus::Healthy
        {
            return Err(ServiceError::conflict(
                "token is healthy and not close to expiry",
            ));
        }

        match capabilities(account.platform).refresh {
            RefreshKind::OAuth => self.refresh_oauth(&account, now).await,
            RefreshKind::Manual => self.refresh_manual(&account, now).await,
            RefreshKind::None => Err(ValidationError::invalid(
                "account_id",
                format!(
                    "{} tokens cannot be refreshed; connect the account again",
                    account.platform
                ),
            )
            .into()),
        }
    }

    async fn refresh_oauth(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> ServiceResult<RefreshResult> {
        let Some(refresh_token) = account.refresh_token.as_deref() else {
            return self
                .reauthorize(account, "no refresh token stored".to_string(), now)
                .await;
        };
        let client = match self.platforms.require(account.platform) {
            Ok(client) => client,
            Err(e) => return self.reauthorize(account, e.to_string(), now).await,
        };

        match with_timeout(
            self.config.token_timeout,
            client.refresh(account.platform, refresh_token),
        )
        .await
        {
            Ok(tokens) => self.store(account, tokens, now).await,
            Err(e) => {
                let message = e.to_string();
                warn!(account_id = account.id, platform = %account.platform, error = %message, "Silent token refresh failed");
                set_account_last_error(self.db.pool(), account.id, &message, now).await?;
                self.reauthorize(account, message, now).await
            }
        }
    }

    async fn refresh_manual(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> ServiceResult<RefreshResult> {
        let result = match self.platforms.require(account.platform) {
            Ok(client) => {
                with_timeout(
                    self.config.token_timeout,
                    client.refresh(account.platform, &account.access_token),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(tokens) => self.store(account, tokens, now).await,
            Err(e) => {
                let message = e.to_string();
                warn!(account_id = account.id, platform = %account.platform, error = %message, "Long-lived token refresh failed");
                set_account_last_error(self.db.pool(), account.id, &message, now).await?;
                Ok(RefreshResult {
                    success: false,
                    requires_reauthorization: false,
                    auth_url: None,
                    error: Some(message),
                    account: None,
                })
            }
        }
    }

    async fn store(
        &self,
        account: &Account,
        tokens: TokenSet,
        now: DateTime<Utc>,
    ) -> ServiceResult<RefreshResult> {
        let stored = update_account_tokens(
            self.db.pool(),
            account.id,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            tokens.expires_at,
            now,
        )
        .await?;
        if !stored {
            warn!(account_id = account.id, "Account disconnected during refresh, new token dropped");
            return Err(ServiceError::conflict(
                "account was disconnected while its token was being refreshed",
            ));
        }

        info!(
            account_id = account.id,
            platform = %account.platform,
            expires_at = ?tokens.expires_at,
            "Token refreshed"
        );

        let refreshed = get_account(self.db.pool(), account.id).await?;
        Ok(RefreshResult {
            success: true,
            requires_reauthorization: false,
            auth_url: None,
            error: None,
            account: refreshed,
        })
    }

    async fn reauthorize(
        &self,
        account: &Account,
        error: String,
        now: DateTime<Utc>,
    ) -> ServiceResult<RefreshResult> {
        let auth_url = match self
            .accounts
            .init_connect(&account.owner, account.platform, None, now)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(account_id = account.id, "Could not start reauthorization: {e}");
                None
            }
        };

        Ok(RefreshResult {
            success: false,
            requires_reauthorization: true,
            auth_url,
            error: Some(error),
            account: None,
        })
    }
}
