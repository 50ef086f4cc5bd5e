//! URL frontier
//!
//! The frontier is the combined ready queue, delayed-retry queue, and
//! visited set for one session. A URL appears at most once across both
//! queues; visited URLs are never dequeued again within the session.
//!
//! Ordering: priority descending, then `ready_at` ascending, then FIFO.
//! An optional durable mirror (see [`crate::store::FrontierPersistence`])
//! tracks pending work so a restarted session can pick up where it left off.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::failure::FailureKind;
use crate::store::FrontierPersistence;
use crate::urlnorm;

/// Scheduling priority of a queued URL
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Where a tracked URL currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    /// In the ready queue, eligible for dequeue
    Ready,
    /// In the delayed-retry queue until `ready_at`
    Retry,
    /// Handed to the worker; neither queue holds it
    InFlight,
}

/// Everything the frontier knows about one queued URL
#[derive(Debug, Clone)]
pub struct QueuedUrlInfo {
    /// Original URL, preserved for fetching
    pub url: String,
    /// Canonical form used for comparison
    pub canonical: String,
    pub priority: Priority,
    pub depth: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub failure_type: Option<FailureKind>,
    pub ready_at: Instant,
    pub queued_at: DateTime<Utc>,
    state: QueueState,
    generation: u64,
}

impl QueuedUrlInfo {
    /// Time until this entry becomes ready; zero when already ready
    #[must_use]
    pub fn ready_in(&self) -> Duration {
        self.ready_at.saturating_duration_since(Instant::now())
    }
}

/// Max-heap entry: higher priority first, earlier `ready_at` first, then FIFO
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    priority: Priority,
    ready_at: Instant,
    seq: u64,
    generation: u64,
    canonical: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.ready_at.cmp(&self.ready_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Min-heap entry on `ready_at` for the delayed-retry queue
#[derive(Debug, Clone, PartialEq, Eq)]
struct RetryEntry {
    ready_at: Instant,
    seq: u64,
    generation: u64,
    canonical: String,
}

impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct FrontierInner {
    info: HashMap<String, QueuedUrlInfo>,
    ready: BinaryHeap<HeapEntry>,
    retry: BinaryHeap<RetryEntry>,
    visited: HashSet<String>,
    last_dequeue: HashMap<String, Instant>,
    seq: u64,
}

impl FrontierInner {
    /// Move due retry entries into the ready queue
    fn promote_due_retries(&mut self) {
        let now = Instant::now();
        while let Some(top) = self.retry.peek() {
            if top.ready_at > now {
                break;
            }
            let Some(entry) = self.retry.pop() else { break };
            let Some(info) = self.info.get_mut(&entry.canonical) else {
                continue; // stale
            };
            if info.state != QueueState::Retry || info.generation != entry.generation {
                continue; // stale
            }
            info.state = QueueState::Ready;
            self.seq += 1;
            self.ready.push(HeapEntry {
                priority: info.priority,
                ready_at: info.ready_at,
                seq: self.seq,
                generation: info.generation,
                canonical: entry.canonical,
            });
        }
    }
}

/// Session-scoped URL frontier with an optional durable mirror
pub struct UrlFrontier {
    session_id: String,
    inner: Mutex<FrontierInner>,
    persistence: Option<Arc<dyn FrontierPersistence>>,
}

impl UrlFrontier {
    #[must_use]
    pub fn new(session_id: String, persistence: Option<Arc<dyn FrontierPersistence>>) -> Self {
        Self {
            session_id,
            inner: Mutex::new(FrontierInner::default()),
            persistence,
        }
    }

    /// Host portion of a URL in comparison form
    #[must_use]
    pub fn extract_domain(url: &str) -> Option<String> {
        urlnorm::extract_host(url)
    }

    /// Insert a URL unless it is already queued or visited
    ///
    /// Returns whether the URL was added. `force` re-enqueues even a visited
    /// URL. Duplicates and non-fetchable URLs fail silently.
    pub fn add_url(&self, url: &str, force: bool, priority: Priority, depth: u32) -> bool {
        self.add_url_internal(url, force, priority, depth, 0, true)
    }

    fn add_url_internal(
        &self,
        url: &str,
        force: bool,
        priority: Priority,
        depth: u32,
        retry_count: u32,
        mirror: bool,
    ) -> bool {
        let Some(canonical) = urlnorm::canonicalize(url) else {
            return false;
        };

        {
            let mut inner = self.inner.lock();
            if force {
                inner.visited.remove(&canonical);
                inner.info.remove(&canonical);
            } else if inner.visited.contains(&canonical) || inner.info.contains_key(&canonical) {
                return false;
            }

            inner.seq += 1;
            let seq = inner.seq;
            let info = QueuedUrlInfo {
                url: url.to_string(),
                canonical: canonical.clone(),
                priority,
                depth,
                retry_count,
                last_error: None,
                failure_type: None,
                ready_at: Instant::now(),
                queued_at: Utc::now(),
                state: QueueState::Ready,
                generation: seq,
            };
            inner.ready.push(HeapEntry {
                priority,
                ready_at: info.ready_at,
                seq,
                generation: seq,
                canonical: canonical.clone(),
            });
            inner.info.insert(canonical.clone(), info);
        }

        if mirror {
            self.mirror_persist(&canonical, depth, retry_count, Utc::now());
        }
        true
    }

    /// Dequeue the highest-priority ready URL, if any
    ///
    /// The returned URL is in-flight: it sits in neither queue and cannot be
    /// re-added until it is marked visited, retried, or discarded.
    pub fn get_next_url(&self) -> Option<QueuedUrlInfo> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.promote_due_retries();

        loop {
            let entry = inner.ready.pop()?;
            let visited = inner.visited.contains(&entry.canonical);
            let Some(info) = inner.info.get_mut(&entry.canonical) else {
                continue;
            };
            if info.state != QueueState::Ready || info.generation != entry.generation {
                continue;
            }
            if visited {
                inner.info.remove(&entry.canonical);
                continue;
            }

            info.state = QueueState::InFlight;
            let snapshot = info.clone();
            if let Some(domain) = urlnorm::extract_host(&snapshot.url) {
                inner.last_dequeue.insert(domain, Instant::now());
            }
            return Some(snapshot);
        }
    }

    /// Move a URL into the delayed-retry queue
    ///
    /// `ready_at` becomes `now + delay`. Idempotent per (url, retry count):
    /// re-scheduling the same attempt is a no-op.
    pub fn schedule_retry(
        &self,
        url: &str,
        retry_count: u32,
        error: &str,
        failure: FailureKind,
        delay: Duration,
    ) -> bool {
        let Some(canonical) = urlnorm::canonicalize(url) else {
            return false;
        };

        let depth = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.visited.contains(&canonical) {
                return false;
            }
            inner.seq += 1;
            let seq = inner.seq;
            let Some(info) = inner.info.get_mut(&canonical) else {
                return false;
            };
            if info.state == QueueState::Retry && info.retry_count >= retry_count {
                return false;
            }

            info.state = QueueState::Retry;
            info.retry_count = retry_count;
            info.last_error = Some(error.to_string());
            info.failure_type = Some(failure);
            info.ready_at = Instant::now() + delay;
            info.generation = seq;
            let entry = RetryEntry {
                ready_at: info.ready_at,
                seq,
                generation: seq,
                canonical: canonical.clone(),
            };
            let depth = info.depth;
            inner.retry.push(entry);
            depth
        };

        let ready_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
        self.mirror_persist(&canonical, depth, retry_count, ready_at);
        true
    }

    /// Terminal transition: remove from both queues, insert into visited
    pub fn mark_visited(&self, url: &str) {
        let Some(canonical) = urlnorm::canonicalize(url) else {
            return;
        };
        {
            let mut inner = self.inner.lock();
            inner.info.remove(&canonical);
            inner.visited.insert(canonical.clone());
        }
        self.mirror_remove(&canonical);
    }

    /// Drop an in-flight URL without marking it visited
    ///
    /// Used when the worker skips a URL (open circuit breaker): the URL may
    /// be re-discovered and re-queued later.
    pub fn discard(&self, url: &str) {
        let Some(canonical) = urlnorm::canonicalize(url) else {
            return;
        };
        {
            let mut inner = self.inner.lock();
            inner.info.remove(&canonical);
        }
        self.mirror_remove(&canonical);
    }

    #[must_use]
    pub fn is_visited(&self, url: &str) -> bool {
        let Some(canonical) = urlnorm::canonicalize(url) else {
            return false;
        };
        self.inner.lock().visited.contains(&canonical)
    }

    /// Number of URLs in the ready queue
    #[must_use]
    pub fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .info
            .values()
            .filter(|i| i.state == QueueState::Ready)
            .count()
    }

    /// Number of URLs in the delayed-retry queue
    #[must_use]
    pub fn retry_queue_size(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .info
            .values()
            .filter(|i| i.state == QueueState::Retry)
            .count()
    }

    /// Total URLs tracked across ready, retry, and in-flight states
    #[must_use]
    pub fn total_tracked(&self) -> usize {
        self.inner.lock().info.len()
    }

    /// Whether a dequeue right now would yield a URL
    #[must_use]
    pub fn has_ready_urls(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.promote_due_retries();
        let now = Instant::now();
        inner
            .info
            .values()
            .any(|i| i.state == QueueState::Ready && i.ready_at <= now)
    }

    /// Retries not yet due
    #[must_use]
    pub fn pending_retry_count(&self) -> usize {
        self.retry_queue_size()
    }

    #[must_use]
    pub fn get_queued_url_info(&self, url: &str) -> Option<QueuedUrlInfo> {
        let canonical = urlnorm::canonicalize(url)?;
        self.inner.lock().info.get(&canonical).cloned()
    }

    /// Last time a URL from this domain was handed to the worker
    #[must_use]
    pub fn get_last_visit_time(&self, domain: &str) -> Option<Instant> {
        self.inner.lock().last_dequeue.get(domain).copied()
    }

    /// Reload pending tasks from the durable mirror
    ///
    /// Returns how many URLs were restored. Already-visited entries are
    /// skipped; restored entries are not mirrored back.
    pub async fn rehydrate(&self, limit: usize) -> usize {
        let Some(persistence) = &self.persistence else {
            return 0;
        };

        let pending = match persistence.load_pending(&self.session_id, limit).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(
                    "Failed to load pending frontier tasks for session {}: {e}",
                    self.session_id
                );
                return 0;
            }
        };

        let mut restored = 0;
        for task in pending {
            if self.add_url_internal(
                &task.url,
                false,
                Priority::Normal,
                task.depth,
                task.retry_count,
                false,
            ) {
                restored += 1;
            }
        }
        debug!(
            "Rehydrated {restored} pending URLs for session {}",
            self.session_id
        );
        restored
    }

    /// Fire-and-forget mirror write; failures log and never propagate
    fn mirror_persist(&self, url: &str, depth: u32, retry_count: u32, ready_at: DateTime<Utc>) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let persistence = Arc::clone(persistence);
        let session_id = self.session_id.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = persistence
                .persist(&session_id, &url, depth, retry_count, ready_at)
                .await
            {
                warn!("Frontier persistence write failed for {url}: {e}");
            }
        });
    }

    fn mirror_remove(&self, url: &str) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let persistence = Arc::clone(persistence);
        let session_id = self.session_id.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = persistence.remove(&session_id, &url).await {
                warn!("Frontier persistence remove failed for {url}: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontier() -> UrlFrontier {
        UrlFrontier::new("test-session".to_string(), None)
    }

    #[test]
    fn test_add_and_dequeue_priority_order() {
        let f = frontier();
        assert!(f.add_url("http://a.test/low", false, Priority::Low, 0));
        assert!(f.add_url("http://a.test/critical", false, Priority::Critical, 0));
        assert!(f.add_url("http://a.test/normal", false, Priority::Normal, 0));

        let first = f.get_next_url().expect("first URL");
        assert_eq!(first.url, "http://a.test/critical");
        let second = f.get_next_url().expect("second URL");
        assert_eq!(second.url, "http://a.test/normal");
        let third = f.get_next_url().expect("third URL");
        assert_eq!(third.url, "http://a.test/low");
        assert!(f.get_next_url().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let f = frontier();
        for i in 0..5 {
            assert!(f.add_url(&format!("http://a.test/{i}"), false, Priority::Normal, 0));
        }
        for i in 0..5 {
            let next = f.get_next_url().expect("URL in FIFO order");
            assert_eq!(next.url, format!("http://a.test/{i}"));
        }
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let f = frontier();
        assert!(f.add_url("http://a.test/", false, Priority::Normal, 0));
        assert!(!f.add_url("http://a.test/", false, Priority::Normal, 0));
        // Canonical duplicates too
        assert!(!f.add_url("http://A.TEST/?utm_source=x", false, Priority::Normal, 0));
        assert_eq!(f.size(), 1);
    }

    #[test]
    fn test_visited_urls_never_requeue() {
        let f = frontier();
        assert!(f.add_url("http://a.test/", false, Priority::Normal, 0));
        let info = f.get_next_url().expect("dequeued");
        f.mark_visited(&info.url);
        assert!(f.is_visited("http://a.test/"));
        assert!(!f.add_url("http://a.test/", false, Priority::Normal, 0));
        assert!(f.get_next_url().is_none());
    }

    #[test]
    fn test_force_requeues_visited() {
        let f = frontier();
        f.add_url("http://a.test/", false, Priority::Normal, 0);
        let info = f.get_next_url().expect("dequeued");
        f.mark_visited(&info.url);
        assert!(f.add_url("http://a.test/", true, Priority::High, 0));
        assert!(!f.is_visited("http://a.test/"));
        assert!(f.get_next_url().is_some());
    }

    #[test]
    fn test_schedule_retry_delays_dequeue() {
        let f = frontier();
        f.add_url("http://a.test/", false, Priority::Normal, 0);
        let info = f.get_next_url().expect("dequeued");

        assert!(f.schedule_retry(
            &info.url,
            1,
            "HTTP 503",
            FailureKind::HttpServerError,
            Duration::from_millis(50),
        ));
        assert_eq!(f.retry_queue_size(), 1);
        assert_eq!(f.size(), 0);
        assert!(f.get_next_url().is_none(), "not ready before the delay");

        std::thread::sleep(Duration::from_millis(70));
        let retried = f.get_next_url().expect("ready after delay");
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.failure_type, Some(FailureKind::HttpServerError));
        assert_eq!(retried.depth, 0, "depth preserved across retries");
    }

    #[test]
    fn test_schedule_retry_idempotent_per_attempt() {
        let f = frontier();
        f.add_url("http://a.test/", false, Priority::Normal, 0);
        let info = f.get_next_url().expect("dequeued");
        assert!(f.schedule_retry(
            &info.url,
            1,
            "err",
            FailureKind::Timeout,
            Duration::from_secs(5)
        ));
        assert!(!f.schedule_retry(
            &info.url,
            1,
            "err again",
            FailureKind::Timeout,
            Duration::from_secs(5)
        ));
        assert_eq!(f.retry_queue_size(), 1);
    }

    #[test]
    fn test_in_flight_not_re_added() {
        let f = frontier();
        f.add_url("http://a.test/", false, Priority::Normal, 0);
        let _info = f.get_next_url().expect("dequeued");
        assert!(!f.add_url("http://a.test/", false, Priority::Normal, 0));
        assert_eq!(f.total_tracked(), 1);
    }

    #[test]
    fn test_discard_allows_rediscovery() {
        let f = frontier();
        f.add_url("http://a.test/", false, Priority::Normal, 0);
        let info = f.get_next_url().expect("dequeued");
        f.discard(&info.url);
        assert!(!f.is_visited("http://a.test/"));
        assert!(f.add_url("http://a.test/", false, Priority::Normal, 1));
    }

    #[test]
    fn test_has_ready_urls_and_pending_retries() {
        let f = frontier();
        assert!(!f.has_ready_urls());
        f.add_url("http://a.test/", false, Priority::Normal, 0);
        assert!(f.has_ready_urls());

        let info = f.get_next_url().expect("dequeued");
        f.schedule_retry(
            &info.url,
            1,
            "err",
            FailureKind::Timeout,
            Duration::from_secs(60),
        );
        assert!(!f.has_ready_urls());
        assert_eq!(f.pending_retry_count(), 1);
    }

    #[test]
    fn test_queued_url_info_lookup() {
        let f = frontier();
        f.add_url("http://a.test/page?b=2&a=1", false, Priority::High, 2);
        let info = f
            .get_queued_url_info("http://a.test/page?a=1&b=2")
            .expect("canonical lookup succeeds");
        assert_eq!(info.priority, Priority::High);
        assert_eq!(info.depth, 2);
    }

    #[tokio::test]
    async fn test_rehydrate_restores_pending() {
        use crate::store::{FrontierPersistence, MemoryFrontierPersistence};

        let persistence = Arc::new(MemoryFrontierPersistence::default());
        persistence
            .persist("s1", "http://a.test/x", 2, 1, Utc::now())
            .await
            .expect("persist");
        persistence
            .persist("s1", "http://a.test/y", 1, 0, Utc::now())
            .await
            .expect("persist");

        let f = UrlFrontier::new("s1".to_string(), Some(persistence));
        let restored = f.rehydrate(100).await;
        assert_eq!(restored, 2);
        assert_eq!(f.size(), 2);

        let mut depths: Vec<(String, u32)> = Vec::new();
        while let Some(info) = f.get_next_url() {
            depths.push((info.url.clone(), info.depth));
        }
        depths.sort();
        assert_eq!(
            depths,
            vec![
                ("http://a.test/x".to_string(), 2),
                ("http://a.test/y".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_mirror_tracks_lifecycle() {
        use crate::store::MemoryFrontierPersistence;

        let persistence = Arc::new(MemoryFrontierPersistence::default());
        let f = UrlFrontier::new("s1".to_string(), Some(persistence.clone()));

        f.add_url("http://a.test/", false, Priority::Normal, 0);
        // Mirror writes are spawned; let them land.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(persistence.pending_count("s1"), 1);

        let info = f.get_next_url().expect("dequeued");
        f.mark_visited(&info.url);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(persistence.pending_count("s1"), 0);
    }
}
