//! Threads publishing through graph.threads.net.
//!
//! Threads issues 60-day long-lived tokens without a refresh token; the
//! token itself is exchanged for a new one before it expires.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::discovered_sub_account;
use super::http::{self, expires_at};
use super::traits::{
    ConnectedIdentity, PlatformClient, PlatformError, PublishReceipt, PublishRequest, TokenSet,
};
use crate::config::PlatformApp;
use crate::db::{MediaKind, Platform};

const THREADS_API_BASE: &str = "https://graph.threads.net/v1.0";
const THREADS_AUTH_BASE: &str = "https://threads.net";
const SCOPES: &str = "threads_basic,threads_content_publish";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Me {
    id: String,
    username: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    permalink: Option<String>,
}

pub struct ThreadsClient {
    client_id: String,
    client_secret: String,
    api_base: String,
    auth_base: String,
    http: Client,
}

impl ThreadsClient {
    #[must_use]
    pub fn new(app: &PlatformApp, http: Client) -> Self {
        Self {
            client_id: app.client_id.clone(),
            client_secret: app.client_secret.clone(),
            api_base: app
                .api_base
                .clone()
                .unwrap_or_else(|| THREADS_API_BASE.to_string()),
            auth_base: app
                .auth_base
                .clone()
                .unwrap_or_else(|| THREADS_AUTH_BASE.to_string()),
            http,
        }
    }

    async fn create(&self, path: &str, form: &[(&str, &str)]) -> Result<String, PlatformError> {
        let resp = self
            .http
            .post(format!("{}/{path}", self.api_base))
            .form(form)
            .send()
            .await?;
        let created: Created = http::json(resp).await?;
        Ok(created.id)
    }
}

#[async_trait]
impl PlatformClient for ThreadsClient {
    fn platforms(&self) -> &'static [Platform] {
        &[Platform::Threads]
    }

    fn authorize_url(
        &self,
        _platform: Platform,
        state: &str,
        _code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, PlatformError> {
        Url::parse_with_params(
            &format!("{}/oauth/authorize", self.auth_base),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", SCOPES),
                ("response_type", "code"),
                ("state", state),
            ],
        )
        .map(String::from)
        .map_err(|e| PlatformError::Unavailable(format!("invalid authorize URL: {e}")))
    }

    async fn exchange_code(
        &self,
        _platform: Platform,
        code: &str,
        _code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ConnectedIdentity, PlatformError> {
        let resp = self
            .http
            .post(format!("{}/oauth/access_token", self.api_base))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await?;
        let short: TokenResponse = http::json(resp).await?;

        let resp = self
            .http
            .get(format!("{}/access_token", self.api_base))
            .query(&[
                ("grant_type", "th_exchange_token"),
                ("client_secret", self.client_secret.as_str()),
                ("access_token", short.access_token.as_str()),
            ])
            .send()
            .await?;
        let long: TokenResponse = http::json(resp).await?;

        let resp = self
            .http
            .get(format!("{}/me", self.api_base))
            .query(&[
                ("fields", "id,username,name"),
                ("access_token", long.access_token.as_str()),
            ])
            .send()
            .await?;
        let me: Me = http::json(resp).await?;
        let display_name = me
            .username
            .or(me.name)
            .unwrap_or_else(|| me.id.clone());

        Ok(ConnectedIdentity {
            sub_accounts: vec![discovered_sub_account(
                Platform::Threads,
                me.id.clone(),
                display_name.clone(),
                0,
                None,
            )],
            external_user_id: me.id,
            display_name,
            tokens: TokenSet {
                access_token: long.access_token,
                refresh_token: None,
                expires_at: expires_at(long.expires_in),
            },
        })
    }

    async fn refresh(&self, _platform: Platform, token: &str) -> Result<TokenSet, PlatformError> {
        let resp = self
            .http
            .get(format!("{}/refresh_access_token", self.api_base))
            .query(&[("grant_type", "th_refresh_token"), ("access_token", token)])
            .send()
            .await?;
        let refreshed: TokenResponse = http::json(resp).await?;
        Ok(TokenSet {
            access_token: refreshed.access_token,
            refresh_token: None,
            expires_at: expires_at(refreshed.expires_in),
        })
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PlatformError> {
        let user = request.external_id;
        let token = request.access_token;
        let path = format!("{user}/threads");

        let container = match request.media {
            [] => {
                self.create(
                    &path,
                    &[
                        ("media_type", "TEXT"),
                        ("text", request.content),
                        ("access_token", token),
                    ],
                )
                .await?
            }
            [single] => {
                let (media_type, url_field) = match single.kind {
                    MediaKind::Image => ("IMAGE", "image_url"),
                    MediaKind::Video => ("VIDEO", "video_url"),
                };
                self.create(
                    &path,
                    &[
                        ("media_type", media_type),
                        (url_field, single.url.as_str()),
                        ("text", request.content),
                        ("access_token", token),
                    ],
                )
                .await?
            }
            items => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    let (media_type, url_field) = match item.kind {
                        MediaKind::Image => ("IMAGE", "image_url"),
                        MediaKind::Video => ("VIDEO", "video_url"),
                    };
                    children.push(
                        self.create(
                            &path,
                            &[
                                ("media_type", media_type),
                                (url_field, item.url.as_str()),
                                ("is_carousel_item", "true"),
                                ("access_token", token),
                            ],
                        )
                        .await?,
                    );
                }
                let children = children.join(",");
                self.create(
                    &path,
                    &[
                        ("media_type", "CAROUSEL"),
                        ("children", children.as_str()),
                        ("text", request.content),
                        ("access_token", token),
                    ],
                )
                .await?
            }
        };

        let id = self
            .create(
                &format!("{user}/threads_publish"),
                &[("creation_id", container.as_str()), ("access_token", token)],
            )
            .await?;

        let resp = self
            .http
            .get(format!("{}/{id}", self.api_base))
            .query(&[("fields", "permalink"), ("access_token", token)])
            .send()
            .await?;
        let permalink: Permalink = http::json(resp).await?;

        Ok(PublishReceipt {
            url: permalink
                .permalink
                .unwrap_or_else(|| format!("https://www.threads.net/post/{id}")),
            platform_post_id: id,
        })
    }
}
