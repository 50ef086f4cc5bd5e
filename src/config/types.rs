//! Core configuration types for the crawl engine

use crate::failure::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors raised when a configuration snapshot fails validation
///
/// Configuration problems are the only fatal-at-start errors in the engine;
/// everything downstream is classified and retried or logged.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
    #[error("max_redirects must be at least 1 when follow_redirects is enabled")]
    ZeroRedirects,
    #[error("retry backoff multiplier must be >= 1.0, got {0}")]
    BackoffMultiplierTooSmall(f64),
    #[error("base retry delay ({base_ms}ms) exceeds max retry delay ({max_ms}ms)")]
    RetryDelayInverted { base_ms: u64, max_ms: u64 },
    #[error("SPA rendering enabled but no browserless gateway URL configured")]
    MissingGatewayUrl,
    #[error("user agent must not be empty")]
    EmptyUserAgent,
}

/// Immutable crawl configuration snapshot
///
/// Built via [`CrawlConfig::builder`]; replaced wholesale by
/// `Crawler::update_config`. All durations are stored as milliseconds so the
/// snapshot serializes cleanly for admin surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Stop after this many successful downloads
    pub(crate) max_pages: u64,
    /// Links deeper than this are dropped
    pub(crate) max_depth: u32,
    pub(crate) request_timeout_ms: u64,
    pub(crate) follow_redirects: bool,
    pub(crate) max_redirects: u32,
    pub(crate) user_agent: String,
    pub(crate) respect_robots_txt: bool,
    /// When set, only URLs on the first seed's host are crawled
    pub(crate) restrict_to_seed_domain: bool,
    pub(crate) store_raw_content: bool,
    /// When false, raw content is truncated to a preview
    pub(crate) include_full_content: bool,
    pub(crate) extract_text_content: bool,
    pub(crate) spa_rendering_enabled: bool,
    pub(crate) browserless_gateway_url: String,
    pub(crate) max_retries: u32,
    pub(crate) base_retry_delay_ms: u64,
    pub(crate) max_retry_delay_ms: u64,
    pub(crate) retry_backoff_multiplier: f64,
    /// Minimum spacing between two requests to the same host
    pub(crate) per_domain_interval_ms: u64,
    pub(crate) circuit_breaker_failure_threshold: u32,
    pub(crate) circuit_breaker_open_ms: u64,
    /// Skip TLS verification (development only)
    pub(crate) accept_invalid_certs: bool,
    /// Test hook: short-circuits robots crawl-delay to 10ms. Never enable in
    /// production; gated so timing-sensitive tests stay fast.
    #[serde(skip)]
    pub(crate) test_mode: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 1000,
            max_depth: 3,
            request_timeout_ms: 30_000,
            follow_redirects: true,
            max_redirects: 10,
            user_agent: "SearchEngineCrawler/1.0".to_string(),
            respect_robots_txt: true,
            restrict_to_seed_domain: false,
            store_raw_content: true,
            include_full_content: false,
            extract_text_content: true,
            spa_rendering_enabled: false,
            browserless_gateway_url: String::new(),
            max_retries: 3,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 300_000,
            retry_backoff_multiplier: 2.0,
            per_domain_interval_ms: 0,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_open_ms: 60_000,
            accept_invalid_certs: false,
            test_mode: false,
        }
    }
}

impl CrawlConfig {
    #[must_use]
    pub fn max_pages(&self) -> u64 {
        self.max_pages
    }

    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    #[must_use]
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn respect_robots_txt(&self) -> bool {
        self.respect_robots_txt
    }

    #[must_use]
    pub fn restrict_to_seed_domain(&self) -> bool {
        self.restrict_to_seed_domain
    }

    #[must_use]
    pub fn store_raw_content(&self) -> bool {
        self.store_raw_content
    }

    #[must_use]
    pub fn include_full_content(&self) -> bool {
        self.include_full_content
    }

    #[must_use]
    pub fn extract_text_content(&self) -> bool {
        self.extract_text_content
    }

    #[must_use]
    pub fn spa_rendering_enabled(&self) -> bool {
        self.spa_rendering_enabled
    }

    #[must_use]
    pub fn browserless_gateway_url(&self) -> &str {
        &self.browserless_gateway_url
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn per_domain_interval(&self) -> Duration {
        Duration::from_millis(self.per_domain_interval_ms)
    }

    #[must_use]
    pub fn circuit_breaker_failure_threshold(&self) -> u32 {
        self.circuit_breaker_failure_threshold
    }

    #[must_use]
    pub fn circuit_breaker_open_duration(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_open_ms)
    }

    #[must_use]
    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    #[must_use]
    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Snapshot the retry/backoff parameters for the failure classifier
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    /// Validate an assembled snapshot
    ///
    /// Called by the builder and by `Crawler::update_config` so a live update
    /// cannot install an invalid snapshot either.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.follow_redirects && self.max_redirects == 0 {
            return Err(ConfigError::ZeroRedirects);
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::BackoffMultiplierTooSmall(
                self.retry_backoff_multiplier,
            ));
        }
        if self.base_retry_delay_ms > self.max_retry_delay_ms {
            return Err(ConfigError::RetryDelayInverted {
                base_ms: self.base_retry_delay_ms,
                max_ms: self.max_retry_delay_ms,
            });
        }
        if self.spa_rendering_enabled && self.browserless_gateway_url.is_empty() {
            return Err(ConfigError::MissingGatewayUrl);
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyUserAgent);
        }
        Ok(())
    }
}
