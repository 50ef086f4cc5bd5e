//! Crawl orchestrator
//!
//! One [`Crawler`] owns one session: its frontier, domain manager, fetcher,
//! parser, metrics, and robots cache, plus a single background worker task
//! that drives the crawl. External collaborators (content store, log bus)
//! are shared. Results are serialized into one list per session; readers
//! take a short lock and copy.

mod types;
mod worker;

pub use types::{CrawlResult, CrawlStatus, Session};

use log::warn;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::{ConfigError, CrawlConfig};
use crate::domains::DomainManager;
use crate::fetcher::{self, PageFetcher};
use crate::frontier::{Priority, QueuedUrlInfo, UrlFrontier};
use crate::log_bus::{LogLevel, SessionLogBus, SessionLogEvent, global_bus};
use crate::metrics::{CrawlMetrics, MetricsSnapshot};
use crate::parser::ContentParser;
use crate::robots::RobotsPolicyCache;
use crate::store::ContentStore;
use crate::urlnorm;

/// Errors that can surface from crawler construction or config updates
#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// How long `stop()` waits for the in-flight fetch before aborting
const STOP_GRACE: Duration = Duration::from_secs(10);
/// Upper bound on URLs restored from the durable mirror at startup
const REHYDRATE_LIMIT: usize = 10_000;

/// Per-session result list with canonical-URL index
///
/// Single writer (the worker); readers copy under the lock. Retries update
/// the existing entry for a URL instead of appending.
#[derive(Default)]
struct ResultsLog {
    list: Vec<CrawlResult>,
    index: HashMap<String, usize>,
    /// When each URL last entered the retry queue, for total retry time
    retry_marks: HashMap<String, Instant>,
}

/// Shared state between the crawler handle and its worker task
pub(crate) struct Engine {
    pub(crate) session: Session,
    pub(crate) config: RwLock<Arc<CrawlConfig>>,
    pub(crate) frontier: UrlFrontier,
    pub(crate) domains: DomainManager,
    pub(crate) robots: RobotsPolicyCache,
    pub(crate) fetcher: PageFetcher,
    pub(crate) parser: ContentParser,
    pub(crate) metrics: CrawlMetrics,
    pub(crate) store: Arc<dyn ContentStore>,
    bus: Option<Arc<SessionLogBus>>,
    results: Mutex<ResultsLog>,
    pub(crate) successful_downloads: AtomicU64,
    pub(crate) total_results: AtomicU64,
    pub(crate) stopped: AtomicBool,
    started: AtomicBool,
}

impl Engine {
    pub(crate) fn bus(&self) -> &SessionLogBus {
        self.bus.as_deref().unwrap_or_else(|| global_bus())
    }

    pub(crate) fn config_snapshot(&self) -> Arc<CrawlConfig> {
        Arc::clone(&self.config.read())
    }

    /// Broadcast a session log line and mirror it to the content store
    pub(crate) fn emit_log(&self, level: LogLevel, message: String) {
        self.bus()
            .broadcast(&self.session.session_id, level, message.clone());
        let store = Arc::clone(&self.store);
        let event = SessionLogEvent::new(self.session.session_id.clone(), level, message);
        tokio::spawn(async move {
            let ack = store.store_crawl_log(&event).await;
            if !ack.success {
                warn!("Crawl log write failed: {}", ack.message);
            }
        });
    }

    /// Mark a dequeued URL as downloading, creating its result on first sight
    pub(crate) fn begin_result(&self, item: &QueuedUrlInfo, domain: &str) {
        let mut results = self.results.lock();
        let now = chrono::Utc::now();
        if let Some(&idx) = results.index.get(&item.canonical) {
            let waited = results
                .retry_marks
                .remove(&item.canonical)
                .map(|mark| mark.elapsed())
                .unwrap_or(Duration::ZERO);
            let entry = &mut results.list[idx];
            entry.crawl_status = CrawlStatus::Downloading;
            entry.retry_count = item.retry_count;
            entry.is_retry_attempt |= item.retry_count > 0;
            entry.started_at = Some(now);
            entry.total_retry_time += waited;
        } else {
            let mut entry = CrawlResult::queued(&item.url, domain, item.queued_at);
            entry.crawl_status = CrawlStatus::Downloading;
            entry.retry_count = item.retry_count;
            entry.is_retry_attempt = item.retry_count > 0;
            entry.started_at = Some(now);
            let idx = results.list.len();
            results.list.push(entry);
            results.index.insert(item.canonical.clone(), idx);
            self.total_results.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record a scheduled retry on the URL's result entry
    pub(crate) fn mark_result_retry(
        &self,
        item: &QueuedUrlInfo,
        kind: crate::failure::FailureKind,
        error: &str,
        next_retry: u32,
    ) {
        let mut results = self.results.lock();
        if let Some(&idx) = results.index.get(&item.canonical) {
            let entry = &mut results.list[idx];
            entry.crawl_status = CrawlStatus::RetryScheduled;
            entry.retry_count = next_retry;
            entry.is_retry_attempt = true;
            entry.failure_type = Some(kind);
            entry.error_message = Some(error.to_string());
        }
        results
            .retry_marks
            .insert(item.canonical.clone(), Instant::now());
    }

    /// Apply a closure to the URL's result entry and return a copy
    pub(crate) fn update_result<F>(&self, canonical: &str, update: F) -> Option<CrawlResult>
    where
        F: FnOnce(&mut CrawlResult),
    {
        let mut results = self.results.lock();
        let &idx = results.index.get(canonical)?;
        let entry = &mut results.list[idx];
        update(entry);
        Some(entry.clone())
    }

    /// Fire-and-forget result write to the content store
    pub(crate) fn push_to_store(&self, result: CrawlResult) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let ack = store.store_crawl_result(&result).await;
            if !ack.success {
                warn!("Content store write failed for {}: {}", result.url, ack.message);
            }
        });
    }
}

/// A session-scoped crawler bound to one background worker
pub struct Crawler {
    engine: Arc<Engine>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Crawler {
    /// Create a crawler with a generated session id
    pub fn new(config: CrawlConfig, store: Arc<dyn ContentStore>) -> Result<Self, CrawlerError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        Self::with_session_id(config, store, session_id)
    }

    /// Create a crawler bound to an existing session id
    ///
    /// Reusing a session id on a store with frontier persistence makes the
    /// new crawler pick up the previous session's pending work.
    pub fn with_session_id(
        config: CrawlConfig,
        store: Arc<dyn ContentStore>,
        session_id: String,
    ) -> Result<Self, CrawlerError> {
        config.validate()?;

        let client = fetcher::build_client(&config)?;
        let fetcher = PageFetcher::with_client(client.clone());
        let robots = RobotsPolicyCache::new(client);
        let persistence = store.frontier_persistence();

        let engine = Engine {
            session: Session::new(session_id.clone()),
            frontier: UrlFrontier::new(session_id, persistence),
            domains: DomainManager::new(&config),
            robots,
            fetcher,
            parser: ContentParser::new(),
            metrics: CrawlMetrics::new(),
            store,
            bus: None,
            results: Mutex::new(ResultsLog::default()),
            successful_downloads: AtomicU64::new(0),
            total_results: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            started: AtomicBool::new(false),
            config: RwLock::new(Arc::new(config)),
        };

        Ok(Self {
            engine: Arc::new(engine),
            worker: Mutex::new(None),
        })
    }

    /// Route this crawler's session logs to a dedicated bus instead of the
    /// process-wide one (test isolation)
    #[must_use]
    pub fn with_log_bus(mut self, bus: Arc<SessionLogBus>) -> Self {
        // Safe: the worker has not started yet, so the engine is unshared.
        if let Some(engine) = Arc::get_mut(&mut self.engine) {
            engine.bus = Some(bus);
        }
        self
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.engine.session.session_id
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.engine.session
    }

    /// Seed the frontier at depth 0 with top priority
    ///
    /// The first seed's host becomes the session's seed domain for the
    /// domain-restriction check. Duplicate seeds collapse to one entry.
    pub fn add_seed_urls<S: AsRef<str>>(&self, seeds: &[S]) -> usize {
        let mut added = 0;
        for seed in seeds {
            let seed = seed.as_ref();
            if let Some(host) = urlnorm::extract_host(seed) {
                self.engine.session.set_seed_domain(&host);
            }
            if self.engine.frontier.add_url(seed, false, Priority::Critical, 0) {
                added += 1;
            }
        }
        added
    }

    /// Spawn the background worker (idempotent)
    pub fn start(&self) {
        if self.engine.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move {
            worker::run_worker(&engine).await;
        });
        *self.worker.lock() = Some(handle);
    }

    /// Wait for the worker to finish on its own
    pub async fn wait(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Crawl worker task failed: {e}");
                }
            }
        }
    }

    /// Start the worker and wait for the session to end
    pub async fn run(&self) {
        self.start();
        self.wait().await;
    }

    /// Request shutdown, wait a bounded grace period, then abort
    ///
    /// The stop flag is checked every loop iteration; only a fetch blocked
    /// inside its own timeout can delay shutdown, bounded by the grace
    /// period.
    pub async fn stop(&self) {
        self.engine.stopped.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!("Crawl worker did not stop within grace period, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.engine.stopped.load(Ordering::SeqCst)
    }

    /// Copy of the session's result list
    #[must_use]
    pub fn get_results(&self) -> Vec<CrawlResult> {
        self.engine.results.lock().list.clone()
    }

    #[must_use]
    pub fn successful_download_count(&self) -> u64 {
        self.engine.successful_downloads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn total_result_count(&self) -> u64 {
        self.engine.total_results.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics.snapshot()
    }

    /// Frontier inspection for admin surfaces
    #[must_use]
    pub fn get_queued_url_info(&self, url: &str) -> Option<QueuedUrlInfo> {
        self.engine.frontier.get_queued_url_info(url)
    }

    #[must_use]
    pub fn frontier_size(&self) -> usize {
        self.engine.frontier.size()
    }

    #[must_use]
    pub fn pending_retry_count(&self) -> usize {
        self.engine.frontier.pending_retry_count()
    }

    /// Atomically replace the configuration
    ///
    /// Rebuilds the fetcher under the new user-agent/timeout/redirect
    /// policy; in-flight requests complete under the prior policy.
    pub fn update_config(&self, config: CrawlConfig) -> Result<(), CrawlerError> {
        config.validate()?;
        self.engine.fetcher.rebuild(&config)?;
        self.engine.domains.update_config(&config);
        *self.engine.config.write() = Arc::new(config);
        Ok(())
    }

    /// Convenience shortcut for capping successful downloads
    pub fn set_max_pages(&self, max_pages: u64) {
        let mut config = (*self.engine.config_snapshot()).clone();
        config.max_pages = max_pages;
        // Only the cap changed; the snapshot stays valid.
        *self.engine.config.write() = Arc::new(config);
    }

    /// Convenience shortcut for capping link depth
    pub fn set_max_depth(&self, max_depth: u32) {
        let mut config = (*self.engine.config_snapshot()).clone();
        config.max_depth = max_depth;
        *self.engine.config.write() = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NullContentStore;

    fn crawler() -> Crawler {
        let config = CrawlConfig::builder().build().expect("valid config");
        Crawler::new(config, Arc::new(NullContentStore)).expect("crawler builds")
    }

    #[test]
    fn test_session_id_generated() {
        let a = crawler();
        let b = crawler();
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn test_duplicate_seeds_collapse() {
        let c = crawler();
        let added = c.add_seed_urls(&["http://a.test/", "http://a.test/"]);
        assert_eq!(added, 1);
        assert_eq!(c.frontier_size(), 1);
    }

    #[test]
    fn test_seed_domain_pinned_to_first_seed() {
        let c = crawler();
        c.add_seed_urls(&["http://a.test/", "http://b.test/"]);
        assert_eq!(c.session().seed_domain(), Some("a.test"));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = CrawlConfig::default();
        let mut bad = config;
        bad.request_timeout_ms = 0;
        let result = Crawler::new(bad, Arc::new(NullContentStore));
        assert!(matches!(result, Err(CrawlerError::Config(_))));
    }

    #[test]
    fn test_set_max_pages_shortcut() {
        let c = crawler();
        c.set_max_pages(7);
        assert_eq!(c.engine.config_snapshot().max_pages(), 7);
        c.set_max_depth(1);
        assert_eq!(c.engine.config_snapshot().max_depth(), 1);
        assert_eq!(c.engine.config_snapshot().max_pages(), 7);
    }

    #[tokio::test]
    async fn test_update_config_swaps_snapshot() {
        let c = crawler();
        let new_config = CrawlConfig::builder()
            .user_agent("SearchEngineCrawler/2.0")
            .max_pages(5)
            .build()
            .expect("valid config");
        c.update_config(new_config).expect("update succeeds");
        let snapshot = c.engine.config_snapshot();
        assert_eq!(snapshot.user_agent(), "SearchEngineCrawler/2.0");
        assert_eq!(snapshot.max_pages(), 5);
    }
}
