//! Shared constants used across the application.

/// User agent sent on every platform API request.
pub const USER_AGENT: &str = concat!("social-scheduler/", env!("CARGO_PKG_VERSION"));

/// OAuth `state` values older than this are rejected at callback time.
pub const OAUTH_STATE_TTL_MINUTES: i64 = 15;

/// Base delay for automatic retries; doubles with each failed attempt.
pub const AUTO_RETRY_BASE_DELAY_MINUTES: i64 = 5;

/// Upper bound for `per_page` on list endpoints.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Error recorded on a target whose publish call exceeded the timeout.
pub const TIMEOUT_ERROR: &str = "timeout";
