//! Crawl configuration
//!
//! [`CrawlConfig`] is an immutable snapshot: the orchestrator replaces the
//! whole value atomically on update, so in-flight requests finish under the
//! policy they started with.

mod builder;
mod types;

pub use builder::CrawlConfigBuilder;
pub use types::{ConfigError, CrawlConfig};
