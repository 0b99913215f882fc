//! Platform capabilities and API clients.

mod capabilities;
mod http;
pub mod linkedin;
pub mod meta;
mod registry;
pub mod threads;
mod traits;
pub mod twitter;

pub use capabilities::{capabilities, Capabilities, RefreshKind};
pub use registry::PlatformRegistry;
pub use traits::{
    ConnectedIdentity, PlatformClient, PlatformError, PublishReceipt, PublishRequest, TokenSet,
};

use crate::db::{NewSubAccount, Platform};

/// A sub-account discovered during connect, with the platform's default
/// capabilities.
#[must_use]
pub fn discovered_sub_account(
    platform: Platform,
    external_id: String,
    name: String,
    follower_count: i64,
    access_token: Option<String>,
) -> NewSubAccount {
    let caps = capabilities(platform);
    NewSubAccount {
        external_id,
        name,
        platform,
        follower_count,
        can_post: true,
        can_schedule: true,
        can_upload_media: caps.max_media > 0,
        max_media_count: caps.max_media as i64,
        max_characters: caps.char_limit as i64,
        access_token,
    }
}

/// Await a platform call, failing with [`PlatformError::Timeout`] once
/// `limit` has passed.
pub async fn with_timeout<T, F>(limit: std::time::Duration, call: F) -> Result<T, PlatformError>
where
    F: std::future::Future<Output = Result<T, PlatformError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(PlatformError::Timeout))
}
