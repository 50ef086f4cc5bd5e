//! Fluent builder for [`CrawlConfig`]
//!
//! Every option has a default, so the builder has no required stages; the
//! `build()` step runs validation and is the single place an invalid
//! configuration can be rejected before a crawler exists.

use super::types::{ConfigError, CrawlConfig};

/// Builder for [`CrawlConfig`] with a fluent interface
///
/// # Example
/// ```rust
/// use search_crawler::config::CrawlConfig;
///
/// let config = CrawlConfig::builder()
///     .max_pages(50)
///     .max_depth(2)
///     .user_agent("SearchEngineCrawler/1.0 (+https://example.org/bot)")
///     .restrict_to_seed_domain(true)
///     .build()
///     .expect("valid config");
/// assert_eq!(config.max_pages(), 50);
/// ```
#[derive(Debug, Clone)]
pub struct CrawlConfigBuilder {
    inner: CrawlConfig,
}

impl Default for CrawlConfigBuilder {
    fn default() -> Self {
        Self {
            inner: CrawlConfig::default(),
        }
    }
}

impl CrawlConfig {
    /// Create a builder pre-loaded with defaults
    #[must_use]
    pub fn builder() -> CrawlConfigBuilder {
        CrawlConfigBuilder::default()
    }
}

impl CrawlConfigBuilder {
    #[must_use]
    pub fn max_pages(mut self, max_pages: u64) -> Self {
        self.inner.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.inner.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.inner.request_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.inner.follow_redirects = follow;
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.inner.max_redirects = max_redirects;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.inner.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn respect_robots_txt(mut self, respect: bool) -> Self {
        self.inner.respect_robots_txt = respect;
        self
    }

    #[must_use]
    pub fn restrict_to_seed_domain(mut self, restrict: bool) -> Self {
        self.inner.restrict_to_seed_domain = restrict;
        self
    }

    #[must_use]
    pub fn store_raw_content(mut self, store: bool) -> Self {
        self.inner.store_raw_content = store;
        self
    }

    #[must_use]
    pub fn include_full_content(mut self, include: bool) -> Self {
        self.inner.include_full_content = include;
        self
    }

    #[must_use]
    pub fn extract_text_content(mut self, extract: bool) -> Self {
        self.inner.extract_text_content = extract;
        self
    }

    /// Enable the headless-browser rendering path for SPA pages
    #[must_use]
    pub fn spa_rendering(mut self, enabled: bool, gateway_url: impl Into<String>) -> Self {
        self.inner.spa_rendering_enabled = enabled;
        self.inner.browserless_gateway_url = gateway_url.into();
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.inner.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn base_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inner.base_retry_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn max_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inner.max_retry_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn retry_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.inner.retry_backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn per_domain_interval_ms(mut self, interval_ms: u64) -> Self {
        self.inner.per_domain_interval_ms = interval_ms;
        self
    }

    #[must_use]
    pub fn circuit_breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.inner.circuit_breaker_failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn circuit_breaker_open_ms(mut self, open_ms: u64) -> Self {
        self.inner.circuit_breaker_open_ms = open_ms;
        self
    }

    /// Skip TLS certificate verification. Development only.
    #[must_use]
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.inner.accept_invalid_certs = accept;
        self
    }

    /// Test hook: collapses robots crawl-delay waits to 10ms
    #[must_use]
    pub fn test_mode(mut self, enabled: bool) -> Self {
        self.inner.test_mode = enabled;
        self
    }

    /// Validate and produce the immutable snapshot
    pub fn build(self) -> Result<CrawlConfig, ConfigError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrawlConfig::builder().build().expect("defaults are valid");
        assert_eq!(config.max_pages(), 1000);
        assert_eq!(config.max_depth(), 3);
        assert_eq!(config.user_agent(), "SearchEngineCrawler/1.0");
        assert!(config.follow_redirects());
        assert_eq!(config.max_redirects(), 10);
        assert!(config.respect_robots_txt());
        assert!(!config.restrict_to_seed_domain());
        assert!(!config.spa_rendering_enabled());
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.circuit_breaker_failure_threshold(), 5);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = CrawlConfig::builder()
            .request_timeout_ms(0)
            .build()
            .expect_err("zero timeout must fail validation");
        assert!(matches!(err, ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_rejects_spa_without_gateway() {
        let err = CrawlConfig::builder()
            .spa_rendering(true, "")
            .build()
            .expect_err("SPA without gateway must fail validation");
        assert!(matches!(err, ConfigError::MissingGatewayUrl));
    }

    #[test]
    fn test_rejects_inverted_retry_delays() {
        let err = CrawlConfig::builder()
            .base_retry_delay_ms(5000)
            .max_retry_delay_ms(1000)
            .build()
            .expect_err("inverted delays must fail validation");
        assert!(matches!(err, ConfigError::RetryDelayInverted { .. }));
    }

    #[test]
    fn test_rejects_small_multiplier() {
        let err = CrawlConfig::builder()
            .retry_backoff_multiplier(0.5)
            .build()
            .expect_err("multiplier below 1.0 must fail validation");
        assert!(matches!(err, ConfigError::BackoffMultiplierTooSmall(_)));
    }
}
