//! Core result and session types for crawl operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::failure::{FailureKind, TransportErrorKind};

/// Lifecycle state of a URL's crawl attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Queued,
    Downloading,
    Downloaded,
    RetryScheduled,
    Failed,
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::RetryScheduled => "retry_scheduled",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Everything known about one URL at the end of its lifecycle
///
/// One entry exists per URL per session; retries update the same entry
/// rather than appending a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    /// Comparison-form host (lowercased, `www.` stripped)
    pub domain: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub content_size: usize,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub text_content: Option<String>,
    /// Raw body; truncated to a preview unless full content is configured
    pub raw_content: Option<String>,
    pub links: Vec<String>,
    pub crawl_status: CrawlStatus,
    pub retry_count: u32,
    pub is_retry_attempt: bool,
    pub failure_type: Option<FailureKind>,
    pub error_message: Option<String>,
    pub transport_error_code: Option<TransportErrorKind>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Cumulative time spent waiting in the retry queue
    #[serde(with = "duration_millis")]
    pub total_retry_time: Duration,
}

impl CrawlResult {
    /// Fresh entry for a URL that just left the frontier
    #[must_use]
    pub fn queued(url: &str, domain: &str, queued_at: DateTime<Utc>) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            domain: domain.to_string(),
            status_code: 0,
            content_type: None,
            content_size: 0,
            title: None,
            meta_description: None,
            text_content: None,
            raw_content: None,
            links: Vec::new(),
            crawl_status: CrawlStatus::Queued,
            retry_count: 0,
            is_retry_attempt: false,
            failure_type: None,
            error_message: None,
            transport_error_code: None,
            queued_at,
            started_at: None,
            finished_at: None,
            total_retry_time: Duration::ZERO,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Identity and set-once SPA flags for one crawl session
///
/// Created with the crawler and destroyed with it; the SPA flags latch on
/// the first successful fetch and never reset within a session.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    /// Host of the first seed; populated when seed restriction is enabled
    seed_domain: OnceLock<String>,
    spa_checked: AtomicBool,
    spa_detected: AtomicBool,
}

impl Session {
    #[must_use]
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            seed_domain: OnceLock::new(),
            spa_checked: AtomicBool::new(false),
            spa_detected: AtomicBool::new(false),
        }
    }

    /// Pin the seed domain; only the first call wins
    pub fn set_seed_domain(&self, domain: &str) {
        let _ = self.seed_domain.set(domain.to_string());
    }

    #[must_use]
    pub fn seed_domain(&self) -> Option<&str> {
        self.seed_domain.get().map(String::as_str)
    }

    /// Mark the one-per-session SPA check as done; returns false if it
    /// already ran
    pub fn mark_spa_checked(&self) -> bool {
        !self.spa_checked.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn spa_checked(&self) -> bool {
        self.spa_checked.load(Ordering::SeqCst)
    }

    pub fn mark_spa_detected(&self) {
        self.spa_detected.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn spa_detected(&self) -> bool {
        self.spa_detected.load(Ordering::SeqCst)
    }
}
