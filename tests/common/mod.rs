//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use social_scheduler::db::{
    insert_account, upsert_sub_account, Database, NewAccount, Platform,
};
use social_scheduler::platforms::{
    discovered_sub_account, ConnectedIdentity, PlatformClient, PlatformError, PublishReceipt,
    PublishRequest, TokenSet,
};
use tempfile::TempDir;

pub const OWNER: &str = "user-1";

/// Current time at the millisecond precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// Insert an account with one sub-account per `(external_id, platform)`.
/// Returns the account id and the sub-account ids in order.
pub async fn seed_account(
    db: &Database,
    owner: &str,
    platform: Platform,
    external_user_id: &str,
    token_expires_at: Option<DateTime<Utc>>,
    subs: &[(&str, Platform)],
    now: DateTime<Utc>,
) -> (i64, Vec<i64>) {
    let account_id = insert_account(
        db.pool(),
        &NewAccount {
            owner: owner.to_string(),
            platform,
            external_user_id: external_user_id.to_string(),
            display_name: format!("{platform} {external_user_id}"),
            access_token: format!("token-{external_user_id}"),
            refresh_token: Some(format!("refresh-{external_user_id}")),
            token_expires_at,
        },
        now,
    )
    .await
    .expect("Failed to insert account");

    let mut ids = Vec::with_capacity(subs.len());
    for (external_id, sub_platform) in subs {
        let sub = discovered_sub_account(
            *sub_platform,
            (*external_id).to_string(),
            format!("Page {external_id}"),
            0,
            None,
        );
        ids.push(
            upsert_sub_account(db.pool(), account_id, &sub, now)
                .await
                .expect("Failed to insert sub-account"),
        );
    }
    (account_id, ids)
}

/// What the fake client does when asked to publish on a platform.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Reject(String),
    AuthError,
    Hang,
}

/// In-memory platform client that records publish calls.
#[derive(Default)]
pub struct FakeClient {
    behaviors: Mutex<HashMap<Platform, Behavior>>,
    published: Mutex<Vec<(Platform, String, String)>>,
    calls: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, platform: Platform, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(platform, behavior);
    }

    /// `(platform, external_id, content)` of every publish call.
    pub fn published(&self) -> Vec<(Platform, String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for FakeClient {
    fn platforms(&self) -> &'static [Platform] {
        &Platform::ALL
    }

    fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        _code_challenge: &str,
        _redirect_uri: &str,
    ) -> Result<String, PlatformError> {
        Ok(format!("https://auth.example/{platform}?state={state}"))
    }

    async fn exchange_code(
        &self,
        _platform: Platform,
        _code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> Result<ConnectedIdentity, PlatformError> {
        Err(PlatformError::Unavailable("fake client cannot connect".into()))
    }

    async fn refresh(&self, _platform: Platform, _token: &str) -> Result<TokenSet, PlatformError> {
        Err(PlatformError::Unavailable("fake client cannot refresh".into()))
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&request.platform)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => {
                let mut published = self.published.lock().unwrap();
                published.push((
                    request.platform,
                    request.external_id.to_string(),
                    request.content.to_string(),
                ));
                let id = format!("{}-{}", request.platform, published.len());
                Ok(PublishReceipt {
                    url: format!("https://{}.example/p/{id}", request.platform),
                    platform_post_id: id,
                })
            }
            Behavior::Reject(message) => Err(PlatformError::Rejected(message)),
            Behavior::AuthError => Err(PlatformError::Auth("token revoked".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(PlatformError::Timeout)
            }
        }
    }
}
