//! Twitter/X API v2 with OAuth 2.0 PKCE.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::discovered_sub_account;
use super::http::{self, expires_at};
use super::traits::{
    ConnectedIdentity, PlatformClient, PlatformError, PublishReceipt, PublishRequest, TokenSet,
};
use crate::config::PlatformApp;
use crate::db::{MediaKind, Platform};

const API_BASE: &str = "https://api.x.com";
const AUTH_BASE: &str = "https://x.com";
const SCOPES: &str = "tweet.read tweet.write users.read media.write offline.access";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Data<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    name: String,
    username: String,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    followers_count: i64,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

pub struct TwitterClient {
    client_id: String,
    client_secret: String,
    api_base: String,
    auth_base: String,
    http: Client,
}

impl TwitterClient {
    #[must_use]
    pub fn new(app: &PlatformApp, http: Client) -> Self {
        Self {
            client_id: app.client_id.clone(),
            client_secret: app.client_secret.clone(),
            api_base: app.api_base.clone().unwrap_or_else(|| API_BASE.to_string()),
            auth_base: app
                .auth_base
                .clone()
                .unwrap_or_else(|| AUTH_BASE.to_string()),
            http,
        }
    }

    /// Basic auth header for the confidential-client token endpoint.
    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, PlatformError> {
        let resp = self
            .http
            .post(format!("{}/2/oauth2/token", self.api_base))
            .header("Authorization", self.basic_auth_header())
            .form(params)
            .send()
            .await?;
        http::json(resp).await
    }

    /// Upload an image and return its media id.
    async fn upload_image(&self, access_token: &str, url: &str) -> Result<String, PlatformError> {
        let bytes = http::check(self.http.get(url).send().await?)
            .await?
            .bytes()
            .await?;
        let media_data = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let resp = self
            .http
            .post(format!("{}/2/media/upload", self.api_base))
            .bearer_auth(access_token)
            .form(&[
                ("media_category", "tweet_image"),
                ("media_data", media_data.as_str()),
            ])
            .send()
            .await?;
        let uploaded: Data<Created> = http::json(resp).await?;
        Ok(uploaded.data.id)
    }
}

fn token_set(token: TokenResponse) -> TokenSet {
    TokenSet {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: expires_at(token.expires_in),
    }
}

#[async_trait]
impl PlatformClient for TwitterClient {
    fn platforms(&self) -> &'static [Platform] {
        &[Platform::Twitter]
    }

    fn authorize_url(
        &self,
        _platform: Platform,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, PlatformError> {
        Url::parse_with_params(
            &format!("{}/i/oauth2/authorize", self.auth_base),
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", SCOPES),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map(String::from)
        .map_err(|e| PlatformError::Unavailable(format!("invalid authorize URL: {e}")))
    }

    async fn exchange_code(
        &self,
        _platform: Platform,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ConnectedIdentity, PlatformError> {
        let token = self
            .token_request(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
            ])
            .await?;

        let resp = self
            .http
            .get(format!("{}/2/users/me", self.api_base))
            .query(&[("user.fields", "public_metrics")])
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let me: Data<User> = http::json(resp).await?;
        let user = me.data;

        Ok(ConnectedIdentity {
            sub_accounts: vec![discovered_sub_account(
                Platform::Twitter,
                user.id.clone(),
                format!("@{}", user.username),
                user.public_metrics.map_or(0, |m| m.followers_count),
                None,
            )],
            external_user_id: user.id,
            display_name: user.name,
            tokens: token_set(token),
        })
    }

    async fn refresh(&self, _platform: Platform, token: &str) -> Result<TokenSet, PlatformError> {
        let token = self
            .token_request(&[("refresh_token", token), ("grant_type", "refresh_token")])
            .await?;
        Ok(token_set(token))
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PlatformError> {
        let mut body = json!({ "text": request.content });

        if !request.media.is_empty() {
            let mut media_ids = Vec::with_capacity(request.media.len());
            for media in request.media {
                if media.kind == MediaKind::Video {
                    return Err(PlatformError::Unavailable(
                        "video uploads to twitter are not supported".to_string(),
                    ));
                }
                media_ids.push(self.upload_image(request.access_token, &media.url).await?);
            }
            body["media"] = json!({ "media_ids": media_ids });
        }
        if let Some(reply_to) = request.options.and_then(|o| o["reply_to"].as_str()) {
            body["reply"] = json!({ "in_reply_to_tweet_id": reply_to });
        }

        let resp = self
            .http
            .post(format!("{}/2/tweets", self.api_base))
            .bearer_auth(request.access_token)
            .json(&body)
            .send()
            .await?;
        let created: Data<Created> = http::json(resp).await?;
        let id = created.data.id;

        Ok(PublishReceipt {
            url: format!("https://x.com/i/web/status/{id}"),
            platform_post_id: id,
        })
    }
}
