use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{Media, NewSubAccount, Platform};

/// Error returned by a platform API call.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The token was rejected; the account needs a refresh or reconnect.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// The platform refused the request; the message is the platform's own.
    #[error("{0}")]
    Rejected(String),
    #[error("{}", crate::constants::TIMEOUT_ERROR)]
    Timeout,
    #[error("http error: {0}")]
    Http(String),
    /// No client, app credentials, or account to publish with.
    #[error("{0}")]
    Unavailable(String),
}

impl PlatformError {
    /// Whether the failure means the stored token is no longer usable.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Tokens issued by a platform.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The identity and publishable pages discovered by an OAuth code exchange.
#[derive(Debug, Clone)]
pub struct ConnectedIdentity {
    pub external_user_id: String,
    pub display_name: String,
    pub tokens: TokenSet,
    /// Empty for platforms where the identity itself is the only target.
    pub sub_accounts: Vec<NewSubAccount>,
}

/// Everything a client needs to publish one target.
#[derive(Debug)]
pub struct PublishRequest<'a> {
    pub platform: Platform,
    /// Platform id of the page or profile being published to.
    pub external_id: &'a str,
    pub access_token: &'a str,
    pub content: &'a str,
    pub media: &'a [Media],
    pub options: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub platform_post_id: String,
    pub url: String,
}

/// A platform API client.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Platforms served by this client.
    fn platforms(&self) -> &'static [Platform];

    /// Browser URL that starts the authorization flow.
    fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, PlatformError>;

    /// Exchange an authorization code for tokens and discover sub-accounts.
    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ConnectedIdentity, PlatformError>;

    /// Renew tokens. `token` is the refresh token for OAuth platforms and
    /// the current access token for long-lived-token platforms.
    async fn refresh(&self, platform: Platform, token: &str) -> Result<TokenSet, PlatformError>;

    /// Publish content to one page or profile.
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PlatformError>;
}
