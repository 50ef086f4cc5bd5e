//! External collaborator interfaces
//!
//! The engine stores crawl output through an injected [`ContentStore`] and
//! optionally mirrors frontier state through [`FrontierPersistence`]. Both
//! are fire-and-forget from the worker's perspective: failures are logged
//! and never abort a crawl.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::crawler::CrawlResult;
use crate::log_bus::SessionLogEvent;

/// Acknowledgement from a store operation
#[derive(Debug, Clone)]
pub struct StoreAck {
    pub success: bool,
    pub message: String,
}

impl StoreAck {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A frontier task waiting to be re-loaded after restart
#[derive(Debug, Clone)]
pub struct PendingUrl {
    pub url: String,
    pub depth: u32,
    pub retry_count: u32,
    pub ready_at: DateTime<Utc>,
}

/// Durable mirror of the frontier, keyed by (session id, url)
///
/// One document per pair with `{url, session_id, depth, retry_count,
/// ready_at, status}`; restart-on-session re-reads all pending documents.
#[async_trait]
pub trait FrontierPersistence: Send + Sync {
    async fn persist(
        &self,
        session_id: &str,
        url: &str,
        depth: u32,
        retry_count: u32,
        ready_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn remove(&self, session_id: &str, url: &str) -> anyhow::Result<()>;

    async fn load_pending(&self, session_id: &str, limit: usize)
    -> anyhow::Result<Vec<PendingUrl>>;
}

/// Downstream content storage (MongoDB in the full system)
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn store_crawl_result(&self, result: &CrawlResult) -> StoreAck;

    async fn store_crawl_log(&self, log: &SessionLogEvent) -> StoreAck;

    /// Frontier mirror, when the store provides one
    fn frontier_persistence(&self) -> Option<Arc<dyn FrontierPersistence>> {
        None
    }
}

/// Store that discards everything
///
/// Used when the crawler runs without collaborators; construction logs a
/// warning at the call site, not here.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullContentStore;

#[async_trait]
impl ContentStore for NullContentStore {
    async fn store_crawl_result(&self, _result: &CrawlResult) -> StoreAck {
        StoreAck::ok()
    }

    async fn store_crawl_log(&self, _log: &SessionLogEvent) -> StoreAck {
        StoreAck::ok()
    }
}

/// In-memory store for tests and examples
///
/// Collects results and logs, and provides a working frontier mirror so
/// rehydration can be exercised without a database.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    results: Mutex<Vec<CrawlResult>>,
    logs: Mutex<Vec<SessionLogEvent>>,
    frontier: Arc<MemoryFrontierPersistence>,
}

impl MemoryContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn results(&self) -> Vec<CrawlResult> {
        self.results.lock().clone()
    }

    #[must_use]
    pub fn logs(&self) -> Vec<SessionLogEvent> {
        self.logs.lock().clone()
    }

    /// The same persistence handle the crawler receives
    #[must_use]
    pub fn frontier(&self) -> Arc<MemoryFrontierPersistence> {
        Arc::clone(&self.frontier)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn store_crawl_result(&self, result: &CrawlResult) -> StoreAck {
        self.results.lock().push(result.clone());
        StoreAck::ok()
    }

    async fn store_crawl_log(&self, log: &SessionLogEvent) -> StoreAck {
        self.logs.lock().push(log.clone());
        StoreAck::ok()
    }

    fn frontier_persistence(&self) -> Option<Arc<dyn FrontierPersistence>> {
        Some(self.frontier.clone())
    }
}

/// In-memory frontier mirror keyed by (session id, url)
#[derive(Debug, Default)]
pub struct MemoryFrontierPersistence {
    pending: Mutex<HashMap<(String, String), PendingUrl>>,
}

impl MemoryFrontierPersistence {
    #[must_use]
    pub fn pending_count(&self, session_id: &str) -> usize {
        self.pending
            .lock()
            .keys()
            .filter(|(sid, _)| sid == session_id)
            .count()
    }
}

#[async_trait]
impl FrontierPersistence for MemoryFrontierPersistence {
    async fn persist(
        &self,
        session_id: &str,
        url: &str,
        depth: u32,
        retry_count: u32,
        ready_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.pending.lock().insert(
            (session_id.to_string(), url.to_string()),
            PendingUrl {
                url: url.to_string(),
                depth,
                retry_count,
                ready_at,
            },
        );
        Ok(())
    }

    async fn remove(&self, session_id: &str, url: &str) -> anyhow::Result<()> {
        self.pending
            .lock()
            .remove(&(session_id.to_string(), url.to_string()));
        Ok(())
    }

    async fn load_pending(
        &self,
        session_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<PendingUrl>> {
        let pending = self.pending.lock();
        Ok(pending
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .take(limit)
            .map(|(_, task)| task.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_store_collects() {
        let store = MemoryContentStore::new();
        let result = CrawlResult::queued("http://a.test/", "a.test", Utc::now());
        let ack = store.store_crawl_result(&result).await;
        assert!(ack.success);
        assert_eq!(store.results().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_persistence_round_trip() {
        let persistence = MemoryFrontierPersistence::default();
        persistence
            .persist("s1", "http://a.test/x", 1, 0, Utc::now())
            .await
            .expect("persist succeeds");
        persistence
            .persist("s2", "http://b.test/", 0, 0, Utc::now())
            .await
            .expect("persist succeeds");

        let pending = persistence
            .load_pending("s1", 10)
            .await
            .expect("load succeeds");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "http://a.test/x");
        assert_eq!(pending[0].depth, 1);

        persistence
            .remove("s1", "http://a.test/x")
            .await
            .expect("remove succeeds");
        assert_eq!(persistence.pending_count("s1"), 0);
        assert_eq!(persistence.pending_count("s2"), 1);
    }
}
