//! Failure classification and retry policy
//!
//! Every failed fetch is mapped to a [`FailureKind`] which drives the retry
//! decision: transient network and server-side failures go back to the
//! frontier's delayed-retry queue with exponential backoff, while client
//! errors, robots denials, and permanent failures are terminal.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Transport-level error categories surfaced by the fetcher
///
/// These are derived from the HTTP client's error taxonomy before any status
/// code exists, so they take precedence in classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportErrorKind {
    /// DNS resolution failed
    Dns,
    /// Connection refused or reset by peer
    ConnectRefused,
    /// Request or connect timeout
    Timeout,
    /// Redirect ceiling exceeded
    RedirectLoop,
    /// Anything else below the HTTP layer
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "dns"),
            Self::ConnectRefused => write!(f, "connect_refused"),
            Self::Timeout => write!(f, "timeout"),
            Self::RedirectLoop => write!(f, "redirect_loop"),
            Self::Other => write!(f, "transport"),
        }
    }
}

/// Categorizes fetch failures for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Generic transient network failure
    TransientNetwork,
    /// Request timed out (transport timeout or HTTP 408)
    Timeout,
    /// DNS resolution failure
    Dns,
    /// Connection refused or reset
    ConnectRefused,
    /// HTTP 5xx other than 501/505
    HttpServerError,
    /// HTTP 429
    HttpRateLimited,
    /// Non-retryable HTTP 4xx
    HttpClientError,
    /// Redirect chain exceeded the configured ceiling
    HttpRedirectLoop,
    /// Response body could not be parsed as expected
    ParseError,
    /// Blocked by robots.txt policy
    RobotsDenied,
    /// Permanent failure with no retry value
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientNetwork => "transient_network",
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::ConnectRefused => "connect_refused",
            Self::HttpServerError => "http_server_error",
            Self::HttpRateLimited => "http_rate_limited",
            Self::HttpClientError => "http_client_error",
            Self::HttpRedirectLoop => "http_redirect_loop",
            Self::ParseError => "parse_error",
            Self::RobotsDenied => "robots_denied",
            Self::Permanent => "permanent",
        };
        write!(f, "{name}")
    }
}

impl FailureKind {
    /// Classify a failed fetch from its status code and transport error
    ///
    /// Transport errors win over status codes; among status codes, 429 and
    /// 5xx are checked before generic 4xx handling. 501 and 505 carry no
    /// retry value and classify as permanent.
    #[must_use]
    pub fn classify(status: Option<u16>, transport: Option<TransportErrorKind>) -> Self {
        if let Some(kind) = transport {
            return match kind {
                TransportErrorKind::Dns => Self::Dns,
                TransportErrorKind::ConnectRefused => Self::ConnectRefused,
                TransportErrorKind::Timeout => Self::Timeout,
                TransportErrorKind::RedirectLoop => Self::HttpRedirectLoop,
                TransportErrorKind::Other => Self::TransientNetwork,
            };
        }

        match status {
            Some(429) => Self::HttpRateLimited,
            Some(501) | Some(505) => Self::Permanent,
            Some(code) if (500..600).contains(&code) => Self::HttpServerError,
            Some(408) => Self::Timeout,
            Some(code) if (400..500).contains(&code) => Self::HttpClientError,
            Some(code) if (300..400).contains(&code) => Self::HttpRedirectLoop,
            _ => Self::Permanent,
        }
    }

    /// Whether this failure kind has retry value at all
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork
                | Self::Timeout
                | Self::Dns
                | Self::ConnectRefused
                | Self::HttpServerError
                | Self::HttpRateLimited
        )
    }
}

/// Retry/backoff parameters, snapshotted from the crawl configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(300_000),
            backoff_multiplier: 2.0,
        }
    }
}

/// Decide whether a failed URL goes back to the retry queue
#[must_use]
pub fn should_retry(kind: FailureKind, retry_count: u32, max_retries: u32) -> bool {
    kind.is_retryable() && retry_count < max_retries
}

/// Compute the delay before retry attempt `attempt` (1-based)
///
/// Exponential backoff `base * multiplier^(attempt-1)` capped at the policy
/// maximum, with ±20% jitter. Rate-limited failures double the delay and
/// never undercut a server-provided `Retry-After`.
#[must_use]
pub fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    kind: FailureKind,
    retry_after: Option<Duration>,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let base_ms = policy.base_delay.as_millis() as f64;
    let mut delay_ms = base_ms * policy.backoff_multiplier.powi(exponent as i32);

    if kind == FailureKind::HttpRateLimited {
        delay_ms *= 2.0;
    }

    delay_ms = delay_ms.min(policy.max_delay.as_millis() as f64);

    let jitter = rand::rng().random_range(0.8..=1.2);
    delay_ms *= jitter;

    let mut delay = Duration::from_millis(delay_ms as u64);
    if let Some(floor) = retry_after {
        if floor > delay {
            delay = floor;
        }
    }
    delay
}
