//! Crawl metrics
//!
//! Lock-free counters for the session totals plus per-domain aggregates.
//! Individual reads are atomic; `snapshot()` gives a coherent view for the
//! end-of-session summary.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-domain aggregate counters
#[derive(Debug, Default)]
pub struct DomainMetrics {
    pub pages: AtomicU64,
    pub failures: AtomicU64,
    pub bytes: AtomicU64,
}

/// Point-in-time copy of a domain's counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DomainSnapshot {
    pub pages: u64,
    pub failures: u64,
    pub bytes: u64,
}

/// Session-wide metrics shared between the worker and readers
#[derive(Debug, Default)]
pub struct CrawlMetrics {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries_scheduled: AtomicU64,
    robots_denied: AtomicU64,
    bytes_downloaded: AtomicU64,
    domains: DashMap<String, DomainMetrics>,
}

/// Coherent copy of all counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries_scheduled: u64,
    pub robots_denied: u64,
    pub bytes_downloaded: u64,
    pub domains: Vec<(String, DomainSnapshot)>,
}

impl CrawlMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, domain: &str) {
        self.attempted.fetch_add(1, Ordering::SeqCst);
        // Touch the entry so domains with only failed attempts still appear
        // in the summary.
        self.domains.entry(domain.to_string()).or_default();
    }

    pub fn record_success(&self, domain: &str, bytes: u64) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
        let entry = self.domains.entry(domain.to_string()).or_default();
        entry.pages.fetch_add(1, Ordering::SeqCst);
        entry.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn record_failure(&self, domain: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let entry = self.domains.entry(domain.to_string()).or_default();
        entry.failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_robots_denied(&self) {
        self.robots_denied.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut domains: Vec<(String, DomainSnapshot)> = self
            .domains
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    DomainSnapshot {
                        pages: entry.value().pages.load(Ordering::SeqCst),
                        failures: entry.value().failures.load(Ordering::SeqCst),
                        bytes: entry.value().bytes.load(Ordering::SeqCst),
                    },
                )
            })
            .collect();
        domains.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            attempted: self.attempted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retries_scheduled: self.retries_scheduled.load(Ordering::SeqCst),
            robots_denied: self.robots_denied.load(Ordering::SeqCst),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::SeqCst),
            domains,
        }
    }
}

impl MetricsSnapshot {
    /// Human-readable summary emitted when a session ends
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Crawl summary: {} attempted, {} downloaded, {} failed, {} retries scheduled, {} robots-denied, {} bytes",
            self.attempted,
            self.succeeded,
            self.failed,
            self.retries_scheduled,
            self.robots_denied,
            self.bytes_downloaded
        );
        for (domain, stats) in &self.domains {
            out.push_str(&format!(
                "\n  {domain}: {} pages, {} failures, {} bytes",
                stats.pages, stats.failures, stats.bytes
            ));
        }
        out
    }
}
