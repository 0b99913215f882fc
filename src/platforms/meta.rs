//! Facebook Pages and Instagram business accounts through the Graph API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::http::{self, expires_at};
use super::traits::{
    ConnectedIdentity, PlatformClient, PlatformError, PublishReceipt, PublishRequest, TokenSet,
};
use super::discovered_sub_account;
use crate::config::PlatformApp;
use crate::db::{Media, MediaKind, Platform};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";
const DIALOG_BASE: &str = "https://www.facebook.com/v19.0";

const FACEBOOK_SCOPES: &str = "pages_show_list,pages_read_engagement,pages_manage_posts";
const INSTAGRAM_SCOPES: &str =
    "pages_show_list,pages_read_engagement,instagram_basic,instagram_content_publish";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Me {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Pages {
    #[serde(default)]
    data: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    name: String,
    access_token: Option<String>,
    followers_count: Option<i64>,
    instagram_business_account: Option<InstagramAccount>,
}

#[derive(Debug, Deserialize)]
struct InstagramAccount {
    id: String,
    username: Option<String>,
    followers_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    permalink: Option<String>,
}

/// Graph API client for the Facebook and Instagram platforms.
pub struct MetaClient {
    client_id: String,
    client_secret: String,
    api_base: String,
    auth_base: String,
    http: Client,
}

impl MetaClient {
    #[must_use]
    pub fn new(app: &PlatformApp, http: Client) -> Self {
        Self {
            client_id: app.client_id.clone(),
            client_secret: app.client_secret.clone(),
            api_base: app
                .api_base
                .clone()
                .unwrap_or_else(|| GRAPH_API_BASE.to_string()),
            auth_base: app
                .auth_base
                .clone()
                .unwrap_or_else(|| DIALOG_BASE.to_string()),
            http,
        }
    }

    async fn long_lived_token(&self, token: &str) -> Result<TokenResponse, PlatformError> {
        let resp = self
            .http
            .get(format!("{}/oauth/access_token", self.api_base))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("fb_exchange_token", token),
            ])
            .send()
            .await?;
        http::json(resp).await
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<Created, PlatformError> {
        let resp = self
            .http
            .post(format!("{}/{path}", self.api_base))
            .form(form)
            .send()
            .await?;
        http::json(resp).await
    }

    async fn publish_page(&self, req: &PublishRequest<'_>) -> Result<PublishReceipt, PlatformError> {
        let page = req.external_id;
        let token = req.access_token.to_string();

        if let Some(video) = req.media.iter().find(|m| m.kind == MediaKind::Video) {
            let created = self
                .post_form(
                    &format!("{page}/videos"),
                    &[
                        ("file_url".into(), video.url.clone()),
                        ("description".into(), req.content.to_string()),
                        ("access_token".into(), token),
                    ],
                )
                .await?;
            return Ok(PublishReceipt {
                url: format!("https://www.facebook.com/{page}/videos/{}", created.id),
                platform_post_id: created.id,
            });
        }

        let mut form = vec![
            ("message".to_string(), req.content.to_string()),
            ("access_token".to_string(), token.clone()),
        ];
        for (i, image) in req.media.iter().enumerate() {
            // Photos are uploaded unpublished, then attached to a single feed post.
            let photo = self
                .post_form(
                    &format!("{page}/photos"),
                    &[
                        ("url".into(), image.url.clone()),
                        ("published".into(), "false".into()),
                        ("access_token".into(), token.clone()),
                    ],
                )
                .await?;
            form.push((
                format!("attached_media[{i}]"),
                serde_json::json!({ "media_fbid": photo.id }).to_string(),
            ));
        }
        if let Some(link) = req.options.and_then(|o| o["link"].as_str()) {
            form.push(("link".to_string(), link.to_string()));
        }

        let created = self.post_form(&format!("{page}/feed"), &form).await?;
        Ok(PublishReceipt {
            url: format!("https://www.facebook.com/{}", created.id),
            platform_post_id: created.id,
        })
    }

    async fn create_container(
        &self,
        ig_user: &str,
        token: &str,
        media: &Media,
        caption: Option<&str>,
        carousel_item: bool,
    ) -> Result<String, PlatformError> {
        let mut form = vec![("access_token".to_string(), token.to_string())];
        match media.kind {
            MediaKind::Image => form.push(("image_url".into(), media.url.clone())),
            MediaKind::Video => {
                let media_type = if carousel_item { "VIDEO" } else { "REELS" };
                form.push(("media_type".into(), media_type.into()));
                form.push(("video_url".into(), media.url.clone()));
            }
        }
        if carousel_item {
            form.push(("is_carousel_item".into(), "true".into()));
        }
        if let Some(caption) = caption {
            form.push(("caption".into(), caption.to_string()));
        }
        Ok(self.post_form(&format!("{ig_user}/media"), &form).await?.id)
    }

    async fn publish_instagram(
        &self,
        req: &PublishRequest<'_>,
    ) -> Result<PublishReceipt, PlatformError> {
        let ig_user = req.external_id;
        let token = req.access_token;

        let container = match req.media {
            [] => {
                return Err(PlatformError::Rejected(
                    "instagram posts require at least one media item".to_string(),
                ))
            }
            [single] => {
                self.create_container(ig_user, token, single, Some(req.content), false)
                    .await?
            }
            items => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    children.push(
                        self.create_container(ig_user, token, item, None, true)
                            .await?,
                    );
                }
                self.post_form(
                    &format!("{ig_user}/media"),
                    &[
                        ("media_type".into(), "CAROUSEL".into()),
                        ("children".into(), children.join(",")),
                        ("caption".into(), req.content.to_string()),
                        ("access_token".into(), token.to_string()),
                    ],
                )
                .await?
                .id
            }
        };
        debug!(ig_user, container = %container, "Created Instagram media container");

        let published = self
            .post_form(
                &format!("{ig_user}/media_publish"),
                &[
                    ("creation_id".into(), container),
                    ("access_token".into(), token.to_string()),
                ],
            )
            .await?;

        let resp = self
            .http
            .get(format!("{}/{}", self.api_base, published.id))
            .query(&[("fields", "permalink"), ("access_token", token)])
            .send()
            .await?;
        let permalink: Permalink = http::json(resp).await?;

        Ok(PublishReceipt {
            url: permalink
                .permalink
                .unwrap_or_else(|| format!("https://www.instagram.com/p/{}", published.id)),
            platform_post_id: published.id,
        })
    }
}

#[async_trait]
impl PlatformClient for MetaClient {
    fn platforms(&self) -> &'static [Platform] {
        &[Platform::Facebook, Platform::Instagram]
    }

    fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        _code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, PlatformError> {
        let scope = if platform == Platform::Instagram {
            INSTAGRAM_SCOPES
        } else {
            FACEBOOK_SCOPES
        };
        Url::parse_with_params(
            &format!("{}/dialog/oauth", self.auth_base),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("response_type", "code"),
                ("scope", scope),
            ],
        )
        .map(String::from)
        .map_err(|e| PlatformError::Unavailable(format!("invalid authorize URL: {e}")))
    }

    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        _code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ConnectedIdentity, PlatformError> {
        let resp = self
            .http
            .get(format!("{}/oauth/access_token", self.api_base))
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await?;
        let short: TokenResponse = http::json(resp).await?;
        let long = self.long_lived_token(&short.access_token).await?;

        let resp = self
            .http
            .get(format!("{}/me", self.api_base))
            .query(&[("fields", "id,name"), ("access_token", long.access_token.as_str())])
            .send()
            .await?;
        let me: Me = http::json(resp).await?;

        let resp = self
            .http
            .get(format!("{}/me/accounts", self.api_base))
            .query(&[
                (
                    "fields",
                    "id,name,access_token,followers_count,instagram_business_account{id,username,followers_count}",
                ),
                ("access_token", long.access_token.as_str()),
            ])
            .send()
            .await?;
        let pages: Pages = http::json(resp).await?;

        let sub_accounts = match platform {
            Platform::Instagram => pages
                .data
                .into_iter()
                .filter_map(|page| {
                    let ig = page.instagram_business_account?;
                    Some(discovered_sub_account(
                        Platform::Instagram,
                        ig.id,
                        ig.username.unwrap_or(page.name),
                        ig.followers_count.unwrap_or(0),
                        page.access_token,
                    ))
                })
                .collect(),
            _ => pages
                .data
                .into_iter()
                .map(|page| {
                    discovered_sub_account(
                        Platform::Facebook,
                        page.id,
                        page.name,
                        page.followers_count.unwrap_or(0),
                        page.access_token,
                    )
                })
                .collect(),
        };

        Ok(ConnectedIdentity {
            external_user_id: me.id,
            display_name: me.name,
            tokens: TokenSet {
                refresh_token: Some(long.access_token.clone()),
                access_token: long.access_token,
                expires_at: expires_at(long.expires_in),
            },
            sub_accounts,
        })
    }

    async fn refresh(&self, _platform: Platform, token: &str) -> Result<TokenSet, PlatformError> {
        // Graph tokens have no refresh token; a valid long-lived token is
        // exchanged for a fresh one.
        let long = self.long_lived_token(token).await?;
        Ok(TokenSet {
            refresh_token: Some(long.access_token.clone()),
            access_token: long.access_token,
            expires_at: expires_at(long.expires_in),
        })
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PlatformError> {
        match request.platform {
            Platform::Instagram => self.publish_instagram(request).await,
            _ => self.publish_page(request).await,
        }
    }
}
