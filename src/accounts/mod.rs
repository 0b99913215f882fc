//! Connected platform accounts: OAuth connect, disconnect and listing.

pub mod oauth;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::constants::OAUTH_STATE_TTL_MINUTES;
use crate::db::{
    delete_sub_accounts, delete_unsent_targets_for_account, find_account_by_identity,
    get_account, insert_account, insert_oauth_state, list_accounts, list_available_accounts,
    list_sub_accounts, mark_account_disconnected, reconnect_account, take_oauth_state,
    upsert_sub_account, Account, AccountStatus, AvailableAccount, Database, NewAccount,
    OAuthState, Platform, SubAccount,
};
use crate::dispatcher::refresh_post_status;
use crate::error::{ServiceError, ServiceResult, ValidationError};
use crate::platforms::{discovered_sub_account, with_timeout, PlatformRegistry};

/// An account with its sub-accounts, as listed by `GET /accounts`.
#[derive(Debug, Clone, Serialize)]
pub struct AccountWithSubAccounts {
    #[serde(flatten)]
    pub account: Account,
    pub sub_accounts: Vec<SubAccount>,
}

/// Registry of connected accounts.
#[derive(Clone)]
pub struct AccountRegistry {
    db: Database,
    platforms: Arc<PlatformRegistry>,
    config: Arc<Config>,
}

impl AccountRegistry {
    #[must_use]
    pub fn new(db: Database, platforms: Arc<PlatformRegistry>, config: Arc<Config>) -> Self {
        Self {
            db,
            platforms,
            config,
        }
    }

    /// Start connecting an account: persist a pending authorization and
    /// return the platform's authorize URL.
    pub async fn init_connect(
        &self,
        owner: &str,
        platform: Platform,
        frontend_origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        let client = self.platforms.get(platform).ok_or_else(|| {
            ValidationError::invalid("platform", format!("{platform} cannot be connected"))
        })?;

        let frontend_origin = frontend_origin
            .map(validate_origin)
            .transpose()?;

        let state = oauth::generate_state();
        let (code_verifier, code_challenge) = oauth::generate_pkce();
        let redirect_uri = self.redirect_uri(platform, frontend_origin.as_deref());

        let auth_url = client
            .authorize_url(platform, &state, &code_challenge, &redirect_uri)
            .map_err(|e| ServiceError::OAuthExchange(e.to_string()))?;

        insert_oauth_state(
            self.db.pool(),
            &OAuthState {
                state,
                owner: owner.to_string(),
                platform,
                code_verifier,
                frontend_origin,
                created_at: now,
            },
        )
        .await?;

        info!(owner, platform = %platform, "Started account connection");
        Ok(auth_url)
    }

    /// Finish connecting an account from the OAuth callback.
    pub async fn complete_connect(
        &self,
        owner: &str,
        platform: Platform,
        code: &str,
        state: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Account> {
        let pending = take_oauth_state(self.db.pool(), state)
            .await?
            .ok_or(ValidationError::InvalidOAuthState)?;

        let expired = now - pending.created_at > Duration::minutes(OAUTH_STATE_TTL_MINUTES);
        if pending.owner != owner || pending.platform != platform || expired {
            warn!(owner, platform = %platform, expired, "Rejected OAuth callback state");
            return Err(ValidationError::InvalidOAuthState.into());
        }

        let client = self
            .platforms
            .require(platform)
            .map_err(|e| ServiceError::OAuthExchange(e.to_string()))?;
        let redirect_uri = self.redirect_uri(platform, pending.frontend_origin.as_deref());

        let identity = with_timeout(
            self.config.token_timeout,
            client.exchange_code(platform, code, &pending.code_verifier, &redirect_uri),
        )
        .await
        .map_err(|e| {
            warn!(owner, platform = %platform, error = %e, "OAuth code exchange failed");
            ServiceError::OAuthExchange(e.to_string())
        })?;

        let new_account = NewAccount {
            owner: owner.to_string(),
            platform,
            external_user_id: identity.external_user_id.clone(),
            display_name: identity.display_name.clone(),
            access_token: identity.tokens.access_token.clone(),
            refresh_token: identity.tokens.refresh_token.clone(),
            token_expires_at: identity.tokens.expires_at,
        };

        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let existing =
            find_account_by_identity(&mut *tx, owner, platform, &identity.external_user_id).await?;
        let account_id = match existing {
            Some(account) if account.status != AccountStatus::Disconnected => {
                return Err(ServiceError::DuplicateAccount { platform });
            }
            Some(account) => {
                reconnect_account(&mut *tx, account.id, &new_account, now).await?;
                info!(account_id = account.id, platform = %platform, "Reconnected account");
                account.id
            }
            None => insert_account(&mut *tx, &new_account, now).await?,
        };

        let sub_accounts = if identity.sub_accounts.is_empty() {
            vec![discovered_sub_account(
                platform,
                identity.external_user_id.clone(),
                identity.display_name.clone(),
                0,
                None,
            )]
        } else {
            identity.sub_accounts
        };
        for sub in &sub_accounts {
            upsert_sub_account(&mut *tx, account_id, sub, now).await?;
        }

        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            account_id,
            owner,
            platform = %platform,
            sub_accounts = sub_accounts.len(),
            "Account connected"
        );

        get_account(self.db.pool(), account_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("account {account_id}")))
    }

    /// Disconnect an account. Unsent targets on its sub-accounts are removed,
    /// published history is kept. Returns the number of removed sub-accounts.
    pub async fn disconnect(
        &self,
        owner: &str,
        account_id: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<u64> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let account = get_account(&mut *tx, account_id)
            .await?
            .filter(|a| a.owner == owner)
            .ok_or_else(|| ServiceError::not_found(format!("account {account_id}")))?;

        mark_account_disconnected(&mut tx, account.id, now).await?;
        let affected_posts = delete_unsent_targets_for_account(&mut *tx, account.id).await?;
        let deleted = delete_sub_accounts(&mut *tx, account.id).await?;
        for post_id in &affected_posts {
            refresh_post_status(&mut tx, *post_id, now).await?;
        }

        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            account_id,
            platform = %account.platform,
            deleted_sub_accounts = deleted,
            affected_posts = affected_posts.len(),
            "Account disconnected"
        );
        Ok(deleted)
    }

    /// All accounts of an owner with their sub-accounts.
    pub async fn list_accounts(&self, owner: &str) -> ServiceResult<Vec<AccountWithSubAccounts>> {
        let accounts = list_accounts(self.db.pool(), owner).await?;
        let mut listed = Vec::with_capacity(accounts.len());
        for account in accounts {
            let sub_accounts = list_sub_accounts(self.db.pool(), account.id).await?;
            listed.push(AccountWithSubAccounts {
                account,
                sub_accounts,
            });
        }
        Ok(listed)
    }

    /// Sub-accounts that can be selected as post targets, filtered on
    /// platform and effective status.
    pub async fn list_available(
        &self,
        owner: &str,
        platform: Option<Platform>,
        status: Option<AccountStatus>,
    ) -> ServiceResult<Vec<AvailableAccount>> {
        let mut available = list_available_accounts(self.db.pool(), owner, platform).await?;
        if let Some(status) = status {
            available.retain(|a| a.status == status);
        }
        Ok(available)
    }

    fn redirect_uri(&self, platform: Platform, frontend_origin: Option<&str>) -> String {
        match frontend_origin {
            Some(origin) => format!("{origin}/oauth/{platform}/callback"),
            None => self.config.oauth_redirect_uri(platform.as_str()),
        }
    }
}

fn validate_origin(origin: &str) -> Result<String, ValidationError> {
    let parsed = Url::parse(origin).map_err(|e| {
        ValidationError::invalid("frontend_origin", format!("not a valid URL: {e}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ValidationError::invalid(
            "frontend_origin",
            "must be an http(s) origin",
        ));
    }
    Ok(origin.trim_end_matches('/').to_string())
}
