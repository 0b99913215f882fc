//! LinkedIn member profiles and organisation pages via the versioned REST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
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

const API_BASE: &str = "https://api.linkedin.com";
const AUTH_BASE: &str = "https://www.linkedin.com";
const LINKEDIN_VERSION: &str = "202401";

const MEMBER_SCOPES: &str = "openid profile w_member_social";
const ORGANISATION_SCOPES: &str = "openid profile w_member_social r_organization_admin w_organization_social";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganizationAcls {
    #[serde(default)]
    elements: Vec<OrganizationAcl>,
}

#[derive(Debug, Deserialize)]
struct OrganizationAcl {
    organization: String,
    #[serde(rename = "organization~")]
    details: Option<OrganizationDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationDetails {
    localized_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitializeUpload {
    value: UploadTarget,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTarget {
    upload_url: String,
    image: String,
}

pub struct LinkedinClient {
    client_id: String,
    client_secret: String,
    api_base: String,
    auth_base: String,
    http: Client,
}

impl LinkedinClient {
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

    fn rest(&self, builder: RequestBuilder, access_token: &str) -> RequestBuilder {
        builder
            .bearer_auth(access_token)
            .header("LinkedIn-Version", LINKEDIN_VERSION)
            .header("X-Restli-Protocol-Version", "2.0.0")
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, PlatformError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(params);
        let resp = self
            .http
            .post(format!("{}/oauth/v2/accessToken", self.auth_base))
            .form(&form)
            .send()
            .await?;
        http::json(resp).await
    }

    async fn administered_organisations(
        &self,
        access_token: &str,
    ) -> Result<Vec<OrganizationAcl>, PlatformError> {
        let resp = self
            .rest(
                self.http.get(format!("{}/v2/organizationAcls", self.api_base)),
                access_token,
            )
            .query(&[
                ("q", "roleAssignee"),
                ("role", "ADMINISTRATOR"),
                (
                    "projection",
                    "(elements*(organization,organization~(localizedName)))",
                ),
            ])
            .send()
            .await?;
        let acls: OrganizationAcls = http::json(resp).await?;
        Ok(acls.elements)
    }

    /// Upload an image owned by `author` and return its image URN.
    async fn upload_image(
        &self,
        access_token: &str,
        author: &str,
        url: &str,
    ) -> Result<String, PlatformError> {
        let resp = self
            .rest(
                self.http
                    .post(format!("{}/rest/images?action=initializeUpload", self.api_base)),
                access_token,
            )
            .json(&json!({ "initializeUploadRequest": { "owner": author } }))
            .send()
            .await?;
        let upload: InitializeUpload = http::json(resp).await?;

        let bytes = http::check(self.http.get(url).send().await?)
            .await?
            .bytes()
            .await?;
        http::check(
            self.http
                .put(&upload.value.upload_url)
                .bearer_auth(access_token)
                .body(bytes)
                .send()
                .await?,
        )
        .await?;

        Ok(upload.value.image)
    }
}

#[async_trait]
impl PlatformClient for LinkedinClient {
    fn platforms(&self) -> &'static [Platform] {
        &[Platform::LinkedinIndividual, Platform::LinkedinOrganisation]
    }

    fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        _code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, PlatformError> {
        let scope = if platform == Platform::LinkedinOrganisation {
            ORGANISATION_SCOPES
        } else {
            MEMBER_SCOPES
        };
        Url::parse_with_params(
            &format!("{}/oauth/v2/authorization", self.auth_base),
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
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
        let token = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        let resp = self
            .http
            .get(format!("{}/v2/userinfo", self.api_base))
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let me: UserInfo = http::json(resp).await?;
        let display_name = me.name.unwrap_or_else(|| me.sub.clone());

        let sub_accounts = if platform == Platform::LinkedinOrganisation {
            self.administered_organisations(&token.access_token)
                .await?
                .into_iter()
                .map(|acl| {
                    let name = acl
                        .details
                        .and_then(|d| d.localized_name)
                        .unwrap_or_else(|| acl.organization.clone());
                    discovered_sub_account(
                        Platform::LinkedinOrganisation,
                        acl.organization,
                        name,
                        0,
                        None,
                    )
                })
                .collect()
        } else {
            vec![discovered_sub_account(
                Platform::LinkedinIndividual,
                format!("urn:li:person:{}", me.sub),
                display_name.clone(),
                0,
                None,
            )]
        };

        Ok(ConnectedIdentity {
            external_user_id: me.sub,
            display_name,
            tokens: TokenSet {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                expires_at: expires_at(token.expires_in),
            },
            sub_accounts,
        })
    }

    async fn refresh(&self, _platform: Platform, token: &str) -> Result<TokenSet, PlatformError> {
        let refreshed = self
            .token_request(&[("grant_type", "refresh_token"), ("refresh_token", token)])
            .await?;
        Ok(TokenSet {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token,
            expires_at: expires_at(refreshed.expires_in),
        })
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PlatformError> {
        let author = request.external_id;

        let mut body = json!({
            "author": author,
            "commentary": request.content,
            "visibility": "PUBLIC",
            "distribution": {
                "feedDistribution": "MAIN_FEED",
                "targetEntities": [],
                "thirdPartyDistributionChannels": []
            },
            "lifecycleState": "PUBLISHED",
            "isReshareDisabledByAuthor": false
        });

        let mut images = Vec::with_capacity(request.media.len());
        for media in request.media {
            if media.kind == MediaKind::Video {
                return Err(PlatformError::Unavailable(
                    "video uploads to linkedin are not supported".to_string(),
                ));
            }
            images.push(
                self.upload_image(request.access_token, author, &media.url)
                    .await?,
            );
        }
        match images.as_slice() {
            [] => {}
            [single] => body["content"] = json!({ "media": { "id": single } }),
            many => {
                let images: Vec<_> = many.iter().map(|id| json!({ "id": id })).collect();
                body["content"] = json!({ "multiImage": { "images": images } });
            }
        }

        let resp = self
            .rest(
                self.http.post(format!("{}/rest/posts", self.api_base)),
                request.access_token,
            )
            .json(&body)
            .send()
            .await?;
        let resp = http::check(resp).await?;
        let urn = resp
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| PlatformError::Http("response is missing x-restli-id".to_string()))?;

        Ok(PublishReceipt {
            url: format!("https://www.linkedin.com/feed/update/{urn}"),
            platform_post_id: urn,
        })
    }
}
