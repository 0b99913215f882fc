use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// OAuth application credentials for one platform family.
#[derive(Debug, Clone)]
pub struct PlatformApp {
    pub client_id: String,
    pub client_secret: String,
    /// Override for the REST API base URL (tests point this at a mock server).
    pub api_base: Option<String>,
    /// Override for the browser-facing authorization base URL.
    pub auth_base: Option<String>,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
    pub public_base_url: String,

    // Media
    pub media_dir: PathBuf,
    pub max_upload_bytes: usize,

    // Dispatcher
    pub worker_concurrency: usize,
    pub per_account_concurrency: usize,
    pub dispatch_poll_interval: Duration,
    pub dispatch_lease: Duration,
    pub publish_timeout: Duration,
    pub auto_retry_max: i64,

    // Token health
    pub token_timeout: Duration,
    pub health_check_interval: Duration,
    pub token_warning_fraction: f64,

    // OAuth
    pub oauth_redirect_base: String,
    pub meta_app: Option<PlatformApp>,
    pub threads_app: Option<PlatformApp>,
    pub twitter_app: Option<PlatformApp>,
    pub linkedin_app: Option<PlatformApp>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let public_base_url = env_or_default("PUBLIC_BASE_URL", "http://localhost:8080");
        let oauth_redirect_base = env_or_default("OAUTH_REDIRECT_BASE", &public_base_url);

        Ok(Self {
            // Database
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/scheduler.sqlite",
            )),

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),

            // Media
            media_dir: PathBuf::from(env_or_default("MEDIA_DIR", "./data/media")),
            max_upload_bytes: parse_env_usize("MAX_UPLOAD_BYTES", 100 * 1024 * 1024)?,

            // Dispatcher
            worker_concurrency: parse_env_usize("WORKER_CONCURRENCY", 4)?,
            per_account_concurrency: parse_env_usize("PER_ACCOUNT_CONCURRENCY", 1)?,
            dispatch_poll_interval: Duration::from_secs(parse_env_u64(
                "DISPATCH_POLL_INTERVAL_SECS",
                5,
            )?),
            dispatch_lease: Duration::from_secs(parse_env_u64("DISPATCH_LEASE_SECS", 300)?),
            publish_timeout: Duration::from_secs(parse_env_u64("PUBLISH_TIMEOUT_SECS", 30)?),
            auto_retry_max: parse_env_i64("AUTO_RETRY_MAX", 0)?,

            // Token health
            token_timeout: Duration::from_secs(parse_env_u64("TOKEN_TIMEOUT_SECS", 15)?),
            health_check_interval: Duration::from_secs(parse_env_u64(
                "HEALTH_CHECK_INTERVAL_SECS",
                3600,
            )?),
            token_warning_fraction: parse_env_f64("TOKEN_WARNING_FRACTION", 0.1)?,

            // OAuth
            oauth_redirect_base: oauth_redirect_base.trim_end_matches('/').to_string(),
            meta_app: platform_app("META")?,
            threads_app: platform_app("THREADS")?,
            twitter_app: platform_app("TWITTER")?,
            linkedin_app: platform_app("LINKEDIN")?,
        })
    }

    /// Configuration with defaults suitable for tests: no platform apps,
    /// paths relative to the working directory, short intervals.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from("./data/test.sqlite"),
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            public_base_url: "http://localhost:8080".to_string(),
            media_dir: PathBuf::from("./data/media"),
            max_upload_bytes: 10 * 1024 * 1024,
            worker_concurrency: 4,
            per_account_concurrency: 1,
            dispatch_poll_interval: Duration::from_millis(50),
            dispatch_lease: Duration::from_secs(300),
            publish_timeout: Duration::from_secs(5),
            auto_retry_max: 0,
            token_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(3600),
            token_warning_fraction: 0.1,
            oauth_redirect_base: "http://localhost:3000".to_string(),
            meta_app: None,
            threads_app: None,
            twitter_app: None,
            linkedin_app: None,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "must be at least 1"));
        }
        if self.per_account_concurrency == 0 {
            return Err(invalid("PER_ACCOUNT_CONCURRENCY", "must be at least 1"));
        }
        if self.max_upload_bytes == 0 {
            return Err(invalid("MAX_UPLOAD_BYTES", "must be at least 1"));
        }
        if self.auto_retry_max < 0 {
            return Err(invalid("AUTO_RETRY_MAX", "cannot be negative"));
        }
        if !(self.token_warning_fraction > 0.0 && self.token_warning_fraction < 1.0) {
            return Err(invalid("TOKEN_WARNING_FRACTION", "must be between 0 and 1"));
        }
        if self.dispatch_lease <= self.publish_timeout {
            return Err(invalid(
                "DISPATCH_LEASE_SECS",
                "must be longer than PUBLISH_TIMEOUT_SECS",
            ));
        }
        if self.public_base_url.is_empty() {
            return Err(invalid("PUBLIC_BASE_URL", "cannot be empty"));
        }
        Ok(())
    }

    /// Redirect URI registered with a platform for the OAuth callback.
    #[must_use]
    pub fn oauth_redirect_uri(&self, platform: &str) -> String {
        format!("{}/oauth/{platform}/callback", self.oauth_redirect_base)
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn platform_app(prefix: &str) -> Result<Option<PlatformApp>, ConfigError> {
    let Some(client_id) = optional_env(&format!("{prefix}_CLIENT_ID")) else {
        return Ok(None);
    };
    let secret_name = format!("{prefix}_CLIENT_SECRET");
    let client_secret =
        optional_env(&secret_name).ok_or(ConfigError::MissingEnvVar(secret_name))?;

    Ok(Some(PlatformApp {
        client_id,
        client_secret,
        api_base: optional_env(&format!("{prefix}_API_BASE")),
        auth_base: optional_env(&format!("{prefix}_AUTH_BASE")),
    }))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_i64(name: &str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
