//! Per-domain politeness and failure tracking
//!
//! For each host the manager enforces a minimum interval between requests,
//! counts consecutive failures, and runs a three-state circuit breaker:
//!
//! - Closed: normal operation
//! - Open: too many consecutive failures, requests are short-circuited
//! - HalfOpen: cooldown elapsed, exactly one probing request allowed
//!
//! A 429 additionally records a rate-limit event and doubles a per-host
//! backoff that decays after a window.

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::time::{Duration, Instant};

use crate::config::CrawlConfig;
use crate::failure::FailureKind;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, requests proceed
    Closed,
    /// Failing, requests are blocked until the cooldown elapses
    Open,
    /// Cooldown elapsed, one probing request allowed
    HalfOpen,
}

/// Extra backoff decay window after a rate-limit event
const RATE_LIMIT_DECAY: Duration = Duration::from_secs(300);
/// Base for the doubling rate-limit backoff
const RATE_LIMIT_BASE: Duration = Duration::from_secs(1);
/// Cap on consecutive doublings so the backoff stays sane
const RATE_LIMIT_MAX_DOUBLINGS: u32 = 6;

/// Tracked state for a single host
#[derive(Debug, Clone)]
pub struct DomainState {
    pub last_visit_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub rate_limit_events: u32,
    pub breaker: BreakerState,
    pub breaker_opened_at: Option<Instant>,
    /// Rate-limit backoff stays in force until this instant
    rate_limit_until: Option<Instant>,
    /// Doubling exponent for the active rate-limit backoff
    rate_limit_doublings: u32,
}

impl DomainState {
    fn new() -> Self {
        Self {
            last_visit_at: None,
            consecutive_failures: 0,
            rate_limit_events: 0,
            breaker: BreakerState::Closed,
            breaker_opened_at: None,
            rate_limit_until: None,
            rate_limit_doublings: 0,
        }
    }

    fn rate_limit_backoff(&self) -> Duration {
        match self.rate_limit_until {
            Some(until) if until > Instant::now() => {
                RATE_LIMIT_BASE * 2u32.pow(self.rate_limit_doublings.min(RATE_LIMIT_MAX_DOUBLINGS))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Breaker thresholds and the politeness interval, replaced atomically on
/// config updates
#[derive(Debug, Clone, Copy)]
struct DomainPolicy {
    min_interval: Duration,
    failure_threshold: u32,
    open_duration: Duration,
}

/// Per-host politeness gate and circuit breaker
pub struct DomainManager {
    domains: DashMap<String, DomainState>,
    policy: RwLock<DomainPolicy>,
}

impl DomainManager {
    #[must_use]
    pub fn new(config: &CrawlConfig) -> Self {
        Self {
            domains: DashMap::new(),
            policy: RwLock::new(DomainPolicy {
                min_interval: config.per_domain_interval(),
                failure_threshold: config.circuit_breaker_failure_threshold().max(1),
                open_duration: config.circuit_breaker_open_duration(),
            }),
        }
    }

    /// Atomic replace of thresholds; per-host state is preserved
    pub fn update_config(&self, config: &CrawlConfig) {
        *self.policy.write() = DomainPolicy {
            min_interval: config.per_domain_interval(),
            failure_threshold: config.circuit_breaker_failure_threshold().max(1),
            open_duration: config.circuit_breaker_open_duration(),
        };
    }

    /// True only while the breaker is Open and the cooldown has not elapsed
    ///
    /// An elapsed cooldown transitions the host to HalfOpen as a side
    /// effect, permitting one probe.
    pub fn is_circuit_breaker_open(&self, host: &str) -> bool {
        let open_duration = self.policy.read().open_duration;
        let mut state = self
            .domains
            .entry(host.to_string())
            .or_insert_with(DomainState::new);

        match state.breaker {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open => match state.breaker_opened_at {
                Some(opened) if opened.elapsed() >= open_duration => {
                    state.breaker = BreakerState::HalfOpen;
                    info!("Circuit breaker HALF-OPEN for {host} after {:?}", opened.elapsed());
                    false
                }
                Some(_) => true,
                None => {
                    // Open with no timestamp cannot time out; stay open.
                    warn!("Circuit breaker for {host} open without a timestamp");
                    true
                }
            },
        }
    }

    /// Whether a request to this host must wait
    #[must_use]
    pub fn should_delay(&self, host: &str, robots_delay: Option<Duration>) -> bool {
        !self.get_delay(host, robots_delay).is_zero()
    }

    /// Remaining politeness wait for this host
    ///
    /// Computed against `last_visit_at + max(config interval, robots
    /// crawl-delay, rate-limit backoff)`; zero when no wait is needed.
    #[must_use]
    pub fn get_delay(&self, host: &str, robots_delay: Option<Duration>) -> Duration {
        let min_interval = self.policy.read().min_interval;
        let Some(state) = self.domains.get(host) else {
            return Duration::ZERO;
        };
        let Some(last_visit) = state.last_visit_at else {
            return Duration::ZERO;
        };

        let mut required = min_interval;
        if let Some(robots) = robots_delay {
            required = required.max(robots);
        }
        required = required.max(state.rate_limit_backoff());

        let elapsed = last_visit.elapsed();
        required.saturating_sub(elapsed)
    }

    /// Record a completed successful fetch
    ///
    /// Resets the failure counter and closes a half-open breaker on the
    /// first success.
    pub fn record_success(&self, host: &str) {
        let mut state = self
            .domains
            .entry(host.to_string())
            .or_insert_with(DomainState::new);

        state.last_visit_at = Some(Instant::now());
        state.consecutive_failures = 0;

        if state.breaker == BreakerState::HalfOpen {
            state.breaker = BreakerState::Closed;
            state.breaker_opened_at = None;
            info!("Circuit breaker CLOSED for {host}");
        }
    }

    /// Record a completed failed fetch
    ///
    /// Opens the breaker at the failure threshold; a failure during a
    /// half-open probe re-opens immediately.
    pub fn record_failure(&self, host: &str, failure: FailureKind, reason: &str) {
        let threshold = self.policy.read().failure_threshold;
        let mut state = self
            .domains
            .entry(host.to_string())
            .or_insert_with(DomainState::new);

        state.last_visit_at = Some(Instant::now());
        state.consecutive_failures += 1;

        match state.breaker {
            BreakerState::HalfOpen => {
                state.breaker = BreakerState::Open;
                state.breaker_opened_at = Some(Instant::now());
                warn!("Circuit breaker RE-OPENED for {host} after half-open probe failed ({failure}): {reason}");
            }
            BreakerState::Closed if state.consecutive_failures >= threshold => {
                state.breaker = BreakerState::Open;
                state.breaker_opened_at = Some(Instant::now());
                warn!(
                    "Circuit breaker OPEN for {host} after {} consecutive failures ({failure}): {reason}",
                    state.consecutive_failures
                );
            }
            _ => {
                debug!(
                    "Failure for {host} ({}/{threshold}, {failure}): {reason}",
                    state.consecutive_failures
                );
            }
        }
    }

    /// Record an HTTP 429 from this host
    ///
    /// Counts as a failure and doubles the host's extra backoff for the
    /// decay window.
    pub fn record_rate_limit(&self, host: &str) {
        {
            let mut state = self
                .domains
                .entry(host.to_string())
                .or_insert_with(DomainState::new);
            state.rate_limit_events += 1;
            let now = Instant::now();
            state.rate_limit_doublings = match state.rate_limit_until {
                Some(until) if until > now => {
                    (state.rate_limit_doublings + 1).min(RATE_LIMIT_MAX_DOUBLINGS)
                }
                _ => 1,
            };
            state.rate_limit_until = Some(now + RATE_LIMIT_DECAY);
            debug!(
                "Rate limit event #{} for {host}, backoff now {:?}",
                state.rate_limit_events,
                state.rate_limit_backoff()
            );
        }
        self.record_failure(host, FailureKind::HttpRateLimited, "HTTP 429");
    }

    /// Snapshot of a host's state, if it has been seen
    #[must_use]
    pub fn get_state(&self, host: &str) -> Option<DomainState> {
        self.domains.get(host).map(|entry| entry.value().clone())
    }

    /// Count of hosts in each breaker state (closed, half-open, open)
    #[must_use]
    pub fn breaker_state_counts(&self) -> (usize, usize, usize) {
        let mut closed = 0;
        let mut half_open = 0;
        let mut open = 0;
        for entry in self.domains.iter() {
            match entry.value().breaker {
                BreakerState::Closed => closed += 1,
                BreakerState::HalfOpen => half_open += 1,
                BreakerState::Open => open += 1,
            }
        }
        (closed, half_open, open)
    }
}
