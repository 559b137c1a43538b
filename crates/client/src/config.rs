//! Client configuration.

use crate::retry::RetryConfig;
use std::time::Duration;

/// Default path used to mint a new access token.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Configuration for the request pipeline.
///
/// Supplied once at construction; every field can be changed afterwards
/// through the setters on [`ApiClient`](crate::ApiClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Whether transient failures are retried at all.
    pub retry_enabled: bool,
    /// Whether requests that ask for caching participate in the cache.
    pub cache_enabled: bool,
    /// TTL used when a cached request does not supply its own.
    pub default_cache_ttl: Duration,
    /// Emit request/response debug lines.
    pub verbose: bool,
    /// Endpoint that exchanges a refresh token for a new access token.
    pub refresh_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8069".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: crate::USER_AGENT.to_string(),
            retry: RetryConfig::default(),
            retry_enabled: true,
            cache_enabled: true,
            default_cache_ttl: Duration::from_secs(300),
            verbose: false,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a new client config builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Build the full URL for a path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// Builder for ClientConfig.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL. A trailing slash is dropped.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the retry configuration and enable retries.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self.config.retry_enabled = true;
        self
    }

    /// Disable retries.
    pub fn without_retry(mut self) -> Self {
        self.config.retry_enabled = false;
        self
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Enable or disable the response cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    /// Set the default cache TTL.
    pub fn with_default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_cache_ttl = ttl;
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set custom User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable verbose request/response logging.
    pub fn with_verbose(mut self, enabled: bool) -> Self {
        self.config.verbose = enabled;
        self
    }

    /// Set the token refresh endpoint.
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.config.refresh_path = path.into();
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
