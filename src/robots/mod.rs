//! robots.txt policy cache
//!
//! One cache entry per host with a TTL. Misses fetch
//! `scheme://host/robots.txt` with a short timeout on the same transport as
//! the page fetcher, but bypass the domain manager: robots fetches are not
//! crawl pages. Unreachable or error responses allow everything under a
//! shorter negative-cache TTL.

use dashmap::DashMap;
use log::{debug, warn};
use robotstxt::DefaultMatcher;
use std::time::{Duration, Instant};
use url::Url;

/// Default TTL for a successfully fetched robots.txt
const POSITIVE_TTL: Duration = Duration::from_secs(3600);
/// Shorter TTL when robots.txt was unreachable and we fell back to allow-all
const NEGATIVE_TTL: Duration = Duration::from_secs(300);
/// robots.txt fetches use a tighter timeout than page fetches
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct RobotsEntry {
    /// Raw robots.txt body; empty when `allow_all` is set
    body: String,
    /// Set when robots.txt was unreachable (4xx/5xx/transport error)
    allow_all: bool,
    fetched_at: Instant,
    ttl: Duration,
}

impl RobotsEntry {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Per-host robots.txt cache answering allow and crawl-delay queries
pub struct RobotsPolicyCache {
    client: reqwest::Client,
    entries: DashMap<String, RobotsEntry>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl RobotsPolicyCache {
    /// Create a cache backed by the given HTTP client
    ///
    /// The client is shared with the page fetcher so robots fetches present
    /// the same user agent and TLS posture.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            entries: DashMap::new(),
            positive_ttl: POSITIVE_TTL,
            negative_ttl: NEGATIVE_TTL,
        }
    }

    /// Check whether `user_agent` may fetch `url`
    ///
    /// Unknown or unreachable robots.txt allows everything.
    pub async fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        let Some((host_key, robots_url)) = robots_location(url) else {
            return true;
        };

        let entry = self.entry_for(&host_key, &robots_url).await;
        if entry.allow_all {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&entry.body, user_agent, url)
    }

    /// Crawl-delay declared for this host, if any
    ///
    /// Prefers the group matching `user_agent`; falls back to the `*` group.
    pub async fn crawl_delay(&self, url: &str, user_agent: &str) -> Option<Duration> {
        let (host_key, robots_url) = robots_location(url)?;
        let entry = self.entry_for(&host_key, &robots_url).await;
        if entry.allow_all {
            return None;
        }
        parse_crawl_delay(&entry.body, user_agent)
    }

    async fn entry_for(&self, host_key: &str, robots_url: &str) -> RobotsEntry {
        if let Some(existing) = self.entries.get(host_key) {
            if existing.is_fresh() {
                return existing.clone();
            }
        }

        let entry = self.fetch_entry(robots_url).await;
        self.entries.insert(host_key.to_string(), entry.clone());
        entry
    }

    async fn fetch_entry(&self, robots_url: &str) -> RobotsEntry {
        let response = self
            .client
            .get(robots_url)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => {
                    debug!("Fetched robots.txt from {robots_url} ({} bytes)", body.len());
                    RobotsEntry {
                        body,
                        allow_all: false,
                        fetched_at: Instant::now(),
                        ttl: self.positive_ttl,
                    }
                }
                Err(e) => {
                    warn!("Failed to read robots.txt body from {robots_url}: {e}");
                    self.allow_all_entry()
                }
            },
            Ok(resp) => {
                debug!(
                    "robots.txt at {robots_url} returned {}, allowing all",
                    resp.status()
                );
                self.allow_all_entry()
            }
            Err(e) => {
                debug!("robots.txt fetch failed for {robots_url}: {e}, allowing all");
                self.allow_all_entry()
            }
        }
    }

    fn allow_all_entry(&self) -> RobotsEntry {
        RobotsEntry {
            body: String::new(),
            allow_all: true,
            fetched_at: Instant::now(),
            ttl: self.negative_ttl,
        }
    }

    /// Number of hosts currently cached
    #[must_use]
    pub fn cached_hosts(&self) -> usize {
        self.entries.len()
    }
}

/// Compute the cache key and robots.txt URL for a page URL
fn robots_location(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    let key = match parsed.port() {
        Some(port) => format!("{}:{port}", host.to_ascii_lowercase()),
        None => host.to_ascii_lowercase(),
    };
    let robots_url = match parsed.port() {
        Some(port) => format!("{}://{}:{}/robots.txt", parsed.scheme(), host, port),
        None => format!("{}://{}/robots.txt", parsed.scheme(), host),
    };
    Some((key, robots_url))
}

/// Parse `Crawl-delay` from a robots.txt body
///
/// Group-aware: a group whose `User-agent` token is a case-insensitive
/// substring of our agent wins over the `*` group. The robotstxt matcher
/// ignores this directive, so it is parsed by hand (fractional seconds are
/// accepted).
fn parse_crawl_delay(body: &str, user_agent: &str) -> Option<Duration> {
    let agent_lower = user_agent.to_ascii_lowercase();
    let mut current_agents: Vec<String> = Vec::new();
    let mut in_group_header = false;
    let mut specific_delay: Option<Duration> = None;
    let mut wildcard_delay: Option<Duration> = None;

    for raw_line in body.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();

        match field.as_str() {
            "user-agent" => {
                if !in_group_header {
                    current_agents.clear();
                }
                current_agents.push(value.to_ascii_lowercase());
                in_group_header = true;
            }
            "crawl-delay" => {
                in_group_header = false;
                let Ok(seconds) = value.parse::<f64>() else {
                    continue;
                };
                if seconds < 0.0 {
                    continue;
                }
                let delay = Duration::from_secs_f64(seconds);
                for agent in &current_agents {
                    if agent == "*" {
                        wildcard_delay.get_or_insert(delay);
                    } else if !agent_lower.is_empty() && agent_lower.contains(agent.as_str()) {
                        specific_delay.get_or_insert(delay);
                    }
                }
            }
            _ => {
                in_group_header = false;
            }
        }
    }

    specific_delay.or(wildcard_delay)
}
