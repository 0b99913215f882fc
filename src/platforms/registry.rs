use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::http::build_client;
use super::linkedin::LinkedinClient;
use super::meta::MetaClient;
use super::threads::ThreadsClient;
use super::traits::{PlatformClient, PlatformError};
use super::twitter::TwitterClient;
use crate::config::Config;
use crate::db::Platform;

/// Platform clients keyed by the platforms they serve.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the configured platform apps. Platforms
    /// without credentials get no client.
    pub fn from_config(config: &Config) -> Result<Self, PlatformError> {
        let http = build_client(config.token_timeout.max(config.publish_timeout))?;
        let mut registry = Self::new();

        if let Some(app) = &config.meta_app {
            registry.register(Arc::new(MetaClient::new(app, http.clone())));
        }
        if let Some(app) = &config.threads_app {
            registry.register(Arc::new(ThreadsClient::new(app, http.clone())));
        }
        if let Some(app) = &config.twitter_app {
            registry.register(Arc::new(TwitterClient::new(app, http.clone())));
        }
        if let Some(app) = &config.linkedin_app {
            registry.register(Arc::new(LinkedinClient::new(app, http)));
        }

        info!(platforms = ?registry.platforms(), "Platform clients configured");

        Ok(registry)
    }

    /// Register a client for every platform it serves, replacing any
    /// previous client for those platforms.
    pub fn register(&mut self, client: Arc<dyn PlatformClient>) {
        for platform in client.platforms() {
            self.clients.insert(*platform, Arc::clone(&client));
        }
    }

    /// Platforms with a client, in declaration order.
    #[must_use]
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.clients.keys().copied().collect();
        platforms.sort_unstable();
        platforms
    }

    /// Client for a platform, if one is configured.
    #[must_use]
    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformClient>> {
        self.clients.get(&platform).cloned()
    }

    /// Client for a platform, or an error naming the missing platform.
    pub fn require(&self, platform: Platform) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        self.get(platform).ok_or_else(|| {
            PlatformError::Unavailable(format!("no client configured for {platform}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformApp;

    #[test]
    fn test_from_config_registers_configured_families() {
        let mut config = Config::for_testing();
        config.meta_app = Some(PlatformApp {
            client_id: "id".into(),
            client_secret: "secret".into(),
            api_base: None,
            auth_base: None,
        });

        let registry = PlatformRegistry::from_config(&config).unwrap();
        assert!(registry.get(Platform::Facebook).is_some());
        assert!(registry.get(Platform::Instagram).is_some());
        assert!(registry.get(Platform::Twitter).is_none());
        assert!(registry.require(Platform::Pinterest).is_err());
    }
}
