//! Session-scoped log fan-out
//!
//! Broadcasts per-session log lines to subscribers. Every message goes to
//! the admin topic; messages with a session id additionally go to that
//! session's topic. Delivery is best-effort: no subscribers means the
//! message is dropped, and a global token bucket discards floods.
//!
//! The bus is a process-wide publish endpoint (set-once global accessor);
//! instance construction stays public for test isolation.

mod streaming;

pub use streaming::{FilteredReceiver, LogStreamError, into_stream};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;

/// Default per-second message budget across all sessions
const DEFAULT_RATE_LIMIT_PER_SEC: f64 = 200.0;
/// Buffered messages per topic before the oldest are dropped
const TOPIC_CAPACITY: usize = 1024;

/// Severity of a session log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

/// A single broadcast log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEvent {
    /// Empty for admin-only messages
    pub session_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionLogEvent {
    #[must_use]
    pub fn new(session_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Token bucket guarding the bus against log floods
#[derive(Debug)]
struct TokenBucket {
    state: Mutex<BucketState>,
    rate_per_sec: f64,
    burst: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: rate_per_sec,
                last_refill: Instant::now(),
            }),
            rate_per_sec,
            burst: rate_per_sec,
        }
    }

    /// Take one token; false means the caller should drop the message
    fn try_take(&self) -> bool {
        let mut state = self.state.lock();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.last_refill = Instant::now();
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Process-wide log fan-out with admin and per-session topics
#[derive(Debug)]
pub struct SessionLogBus {
    admin: broadcast::Sender<SessionLogEvent>,
    sessions: DashMap<String, broadcast::Sender<SessionLogEvent>>,
    limiter: TokenBucket,
    dropped: AtomicU64,
    published: AtomicU64,
}

impl SessionLogBus {
    /// Create a bus with the default rate limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limit(DEFAULT_RATE_LIMIT_PER_SEC)
    }

    /// Create a bus with a custom messages-per-second budget
    #[must_use]
    pub fn with_rate_limit(rate_per_sec: f64) -> Self {
        let (admin, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            admin,
            sessions: DashMap::new(),
            limiter: TokenBucket::new(rate_per_sec.max(1.0)),
            dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    /// Subscribe to every message on the bus
    #[must_use]
    pub fn subscribe_admin(&self) -> broadcast::Receiver<SessionLogEvent> {
        self.admin.subscribe()
    }

    /// Subscribe to one session's messages, creating the topic if needed
    #[must_use]
    pub fn subscribe_session(&self, session_id: &str) -> broadcast::Receiver<SessionLogEvent> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to the admin topic through a predicate
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&SessionLogEvent) -> bool + Send + Sync + 'static,
    {
        FilteredReceiver::new(self.subscribe_admin(), filter)
    }

    /// Publish a log line
    ///
    /// Empty `session_id` goes to the admin topic only. Returns false when
    /// the message was discarded by the rate limiter.
    pub fn broadcast(&self, session_id: &str, level: LogLevel, message: impl Into<String>) -> bool {
        if !self.limiter.try_take() {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return false;
        }

        let event = SessionLogEvent::new(session_id, level, message);
        self.published.fetch_add(1, Ordering::SeqCst);

        // Best-effort: send errors just mean nobody is listening.
        let _ = self.admin.send(event.clone());
        if !session_id.is_empty() {
            if let Some(topic) = self.sessions.get(session_id) {
                let _ = topic.send(event);
            }
        }
        true
    }

    /// Drop a finished session's topic
    pub fn remove_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Messages discarded by the rate limiter so far
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Messages accepted so far
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

impl Default for SessionLogBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Global bus instance used by crawlers in production
static GLOBAL_BUS: OnceLock<SessionLogBus> = OnceLock::new();

/// Get or initialize the process-wide bus
///
/// For test isolation, construct `SessionLogBus` instances directly instead.
#[must_use]
pub fn global_bus() -> &'static SessionLogBus {
    GLOBAL_BUS.get_or_init(SessionLogBus::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admin_receives_everything() {
        let bus = SessionLogBus::new();
        let mut admin = bus.subscribe_admin();

        assert!(bus.broadcast("s1", LogLevel::Info, "session message"));
        assert!(bus.broadcast("", LogLevel::Warning, "admin message"));

        let first = admin.recv().await.expect("first message");
        assert_eq!(first.session_id, "s1");
        assert_eq!(first.level, LogLevel::Info);

        let second = admin.recv().await.expect("second message");
        assert_eq!(second.session_id, "");
        assert_eq!(second.message, "admin message");
    }

    #[tokio::test]
    async fn test_session_topic_scoped() {
        let bus = SessionLogBus::new();
        let mut s1 = bus.subscribe_session("s1");

        bus.broadcast("s2", LogLevel::Info, "other session");
        bus.broadcast("s1", LogLevel::Info, "mine");

        let received = s1.recv().await.expect("scoped message");
        assert_eq!(received.message, "mine");
        assert!(s1.try_recv().is_err(), "no cross-session leakage");
    }

    #[test]
    fn test_rate_limiter_discards_flood() {
        let bus = SessionLogBus::with_rate_limit(5.0);
        let mut accepted = 0;
        for _ in 0..100 {
            if bus.broadcast("", LogLevel::Debug, "spam") {
                accepted += 1;
            }
        }
        assert!(accepted <= 6, "accepted {accepted} messages over budget");
        assert!(bus.dropped_count() >= 94);
    }

    #[test]
    fn test_global_bus_is_singleton() {
        let a = global_bus() as *const SessionLogBus;
        let b = global_bus() as *const SessionLogBus;
        assert_eq!(a, b);
    }
}
