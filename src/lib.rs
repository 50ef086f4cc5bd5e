//! Session-scoped polite web crawler core
//!
//! The crawling engine of a multi-component search system: a resumable,
//! per-session crawler that fetches HTML (including single-page
//! applications via a headless-browser gateway), extracts links, schedules
//! retries with exponential backoff, enforces per-domain politeness and
//! circuit breaking, and streams progress to live observers.
//!
//! Content storage and frontier persistence are injected collaborators
//! (see [`store`]); the engine only depends on their interfaces.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use search_crawler::config::CrawlConfig;
//! use search_crawler::crawler::Crawler;
//! use search_crawler::store::MemoryContentStore;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = CrawlConfig::builder()
//!     .max_pages(100)
//!     .max_depth(2)
//!     .restrict_to_seed_domain(true)
//!     .build()?;
//!
//! let store = Arc::new(MemoryContentStore::new());
//! let crawler = Crawler::new(config, store.clone())?;
//! crawler.add_seed_urls(&["https://example.com/"]);
//! crawler.run().await;
//!
//! for result in crawler.get_results() {
//!     println!("{} -> {}", result.url, result.crawl_status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crawler;
pub mod domains;
pub mod failure;
pub mod fetcher;
pub mod frontier;
pub mod log_bus;
pub mod metrics;
pub mod parser;
pub mod robots;
pub mod store;
pub mod urlnorm;

pub use config::{ConfigError, CrawlConfig};
pub use crawler::{CrawlResult, CrawlStatus, Crawler, CrawlerError, Session};
pub use domains::{BreakerState, DomainManager};
pub use failure::{FailureKind, TransportErrorKind};
pub use fetcher::{FetchResult, PageFetcher};
pub use frontier::{Priority, QueuedUrlInfo, UrlFrontier};
pub use log_bus::{LogLevel, SessionLogBus, SessionLogEvent, global_bus};
pub use metrics::{CrawlMetrics, MetricsSnapshot};
pub use parser::{ContentParser, ParsedContent};
pub use robots::RobotsPolicyCache;
pub use store::{
    ContentStore, FrontierPersistence, MemoryContentStore, NullContentStore, PendingUrl, StoreAck,
};

/// Crawl a set of seeds to completion with a one-off crawler
///
/// Convenience wrapper for callers that do not need incremental control.
pub async fn crawl(
    config: CrawlConfig,
    store: std::sync::Arc<dyn ContentStore>,
    seeds: &[&str],
) -> Result<Vec<CrawlResult>, CrawlerError> {
    let crawler = Crawler::new(config, store)?;
    crawler.add_seed_urls(seeds);
    crawler.run().await;
    Ok(crawler.get_results())
}
