//! The session worker loop
//!
//! One background task per crawler. The loop pulls ready URLs from the
//! frontier, gates them through the domain manager and robots policy,
//! fetches, parses, feeds discovered links back, and routes failures
//! through the retry scheduler. The loop never unwinds: every per-URL
//! failure becomes a classified result, and only the stop flag or an
//! exhausted frontier ends the session.

use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{CrawlStatus, Engine, REHYDRATE_LIMIT};
use crate::config::CrawlConfig;
use crate::failure::{self, FailureKind, TransportErrorKind};
use crate::fetcher::FetchResult;
use crate::frontier::{Priority, QueuedUrlInfo};
use crate::log_bus::LogLevel;
use crate::parser::ParsedContent;
use crate::urlnorm;

/// Sleep when no URL is ready but retries are pending
const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pause between iterations to avoid tight spinning
const LOOP_PAUSE: Duration = Duration::from_millis(5);
/// Raw-content preview size when full content is not configured
const RAW_PREVIEW_BYTES: usize = 500;
/// Robots crawl-delay short-circuit under test mode
const TEST_MODE_CRAWL_DELAY: Duration = Duration::from_millis(10);

/// Outcome of processing one URL
enum Outcome {
    Success {
        fetch: FetchResult,
        parsed: ParsedContent,
        links_enqueued: usize,
    },
    Failure {
        kind: FailureKind,
        status_code: u16,
        error: String,
        transport: Option<TransportErrorKind>,
        retry_after: Option<Duration>,
    },
}

pub(crate) async fn run_worker(engine: &Engine) {
    let restored = engine.frontier.rehydrate(REHYDRATE_LIMIT).await;
    if restored > 0 {
        engine.emit_log(
            LogLevel::Info,
            format!("Restored {restored} pending URLs from persistence"),
        );
    }

    loop {
        if engine.stopped.load(Ordering::SeqCst) {
            break;
        }

        let config = engine.config_snapshot();
        if engine.successful_downloads.load(Ordering::SeqCst) >= config.max_pages() {
            debug!("Reached max pages ({}), stopping", config.max_pages());
            engine.stopped.store(true, Ordering::SeqCst);
            break;
        }

        let Some(item) = engine.frontier.get_next_url() else {
            if engine.frontier.pending_retry_count() > 0 {
                tokio::time::sleep(RETRY_POLL_INTERVAL).await;
                continue;
            }
            debug!("Frontier exhausted, stopping");
            engine.stopped.store(true, Ordering::SeqCst);
            break;
        };

        let Some(host) = urlnorm::extract_host(&item.url) else {
            // Canonicalization guarantees a host; treat breakage as terminal.
            warn!("Dropping URL without extractable host: {}", item.url);
            engine.frontier.mark_visited(&item.url);
            continue;
        };

        if engine.domains.is_circuit_breaker_open(&host) {
            debug!("Circuit breaker open for {host}, skipping {}", item.url);
            engine.emit_log(
                LogLevel::Debug,
                format!("Skipping {} (circuit breaker open for {host})", item.url),
            );
            engine.frontier.discard(&item.url);
            continue;
        }

        let robots_delay = robots_delay(engine, &item.url, &config).await;
        if engine.domains.should_delay(&host, robots_delay) {
            let delay = engine.domains.get_delay(&host, robots_delay);
            engine.frontier.schedule_retry(
                &item.url,
                item.retry_count,
                "domain delay",
                FailureKind::TransientNetwork,
                delay,
            );
            continue;
        }

        engine.begin_result(&item, &host);
        engine.metrics.record_attempt(&host);
        engine.emit_log(
            LogLevel::Info,
            format!(
                "Downloading {} (depth {}, attempt {})",
                item.url,
                item.depth,
                item.retry_count + 1
            ),
        );

        let outcome = process_url(engine, &item, &config).await;
        match outcome {
            Outcome::Success {
                fetch,
                parsed,
                links_enqueued,
            } => {
                engine.frontier.mark_visited(&item.url);
                engine.domains.record_success(&host);

                let content_size = fetch.body.len();
                let result = engine.update_result(&item.canonical, |entry| {
                    entry.final_url = fetch.final_url.clone();
                    entry.status_code = fetch.status_code;
                    entry.content_type = fetch.content_type.clone();
                    entry.content_size = content_size;
                    entry.title = parsed.title.clone();
                    entry.meta_description = parsed.meta_description.clone();
                    entry.text_content = parsed.text_content.clone();
                    entry.raw_content = raw_content(&fetch.body, &config);
                    entry.links = parsed.links.clone();
                    entry.crawl_status = CrawlStatus::Downloaded;
                    entry.failure_type = None;
                    entry.error_message = None;
                    entry.finished_at = Some(chrono::Utc::now());
                });

                engine.metrics.record_success(&host, content_size as u64);
                let downloaded = engine.successful_downloads.fetch_add(1, Ordering::SeqCst) + 1;

                if let Some(result) = result {
                    engine.push_to_store(result);
                }
                engine.emit_log(
                    LogLevel::Info,
                    format!(
                        "Downloaded {} ({} bytes, {} new links)",
                        item.url, content_size, links_enqueued
                    ),
                );

                if downloaded >= config.max_pages() {
                    info!("Reached max pages ({}), stopping", config.max_pages());
                    engine.stopped.store(true, Ordering::SeqCst);
                }
            }
            Outcome::Failure {
                kind,
                status_code,
                error,
                transport,
                retry_after,
            } => {
                handle_failure(
                    engine,
                    &item,
                    &host,
                    &config,
                    kind,
                    status_code,
                    &error,
                    transport,
                    retry_after,
                );
            }
        }

        tokio::time::sleep(LOOP_PAUSE).await;
    }

    finish_session(engine);
}

/// Robots crawl-delay for the URL's host, honouring the test-mode shortcut
async fn robots_delay(
    engine: &Engine,
    url: &str,
    config: &CrawlConfig,
) -> Option<Duration> {
    if !config.respect_robots_txt() {
        return None;
    }
    let delay = engine.robots.crawl_delay(url, config.user_agent()).await?;
    if config.test_mode() {
        Some(TEST_MODE_CRAWL_DELAY)
    } else {
        Some(delay)
    }
}

/// Robots gate, fetch, SPA switch, parse, and link feedback for one URL
async fn process_url(engine: &Engine, item: &QueuedUrlInfo, config: &CrawlConfig) -> Outcome {
    if config.respect_robots_txt()
        && !engine.robots.is_allowed(&item.url, config.user_agent()).await
    {
        engine.metrics.record_robots_denied();
        return Outcome::Failure {
            kind: FailureKind::RobotsDenied,
            status_code: 0,
            error: "denied by robots.txt".to_string(),
            transport: None,
            retry_after: None,
        };
    }

    let mut fetch = engine.fetcher.fetch(&item.url).await;

    // One SPA check per session, on the first successful fetch. A positive
    // check switches the fetcher to the gateway path and re-renders the
    // current page through it.
    if fetch.success()
        && config.spa_rendering_enabled()
        && !engine.fetcher.spa_mode()
        && engine.session.mark_spa_checked()
    {
        let html = String::from_utf8_lossy(&fetch.body);
        if engine.fetcher.is_spa_page(&html, &item.url) {
            engine.session.mark_spa_detected();
            engine
                .fetcher
                .set_spa_rendering(true, config.browserless_gateway_url(), config);
            engine.emit_log(
                LogLevel::Info,
                format!("SPA detected at {}, switching to browser rendering", item.url),
            );
            let rendered = engine.fetcher.fetch(&item.url).await;
            if rendered.success() {
                fetch = rendered;
            } else {
                warn!(
                    "Gateway render of {} failed ({}), keeping direct response",
                    item.url,
                    rendered
                        .error_message
                        .as_deref()
                        .unwrap_or("unknown error")
                );
            }
        }
    }

    if !fetch.success() {
        let status = if fetch.status_code == 0 {
            None
        } else {
            Some(fetch.status_code)
        };
        let kind = FailureKind::classify(status, fetch.transport_error);
        let error = fetch
            .error_message
            .clone()
            .unwrap_or_else(|| kind.to_string());
        return Outcome::Failure {
            kind,
            status_code: fetch.status_code,
            error,
            transport: fetch.transport_error,
            retry_after: fetch.retry_after,
        };
    }

    let parsed = engine.parser.parse(
        &fetch.body,
        fetch.content_type.as_deref(),
        &fetch.final_url,
        config.extract_text_content(),
    );

    let links_enqueued = enqueue_links(engine, &parsed.links, item.depth, config).await;

    Outcome::Success {
        fetch,
        parsed,
        links_enqueued,
    }
}

/// Feed extracted links back into the frontier at `depth + 1`
///
/// Applies the depth ceiling, seed-domain restriction, robots allow-check,
/// and the frontier growth limits: beyond 3x max pages new links are
/// demoted to low priority, beyond 5x they are dropped.
async fn enqueue_links(
    engine: &Engine,
    links: &[String],
    depth: u32,
    config: &CrawlConfig,
) -> usize {
    let next_depth = depth + 1;
    if next_depth > config.max_depth() {
        return 0;
    }

    let soft_cap = config.max_pages().saturating_mul(3);
    let hard_cap = config.max_pages().saturating_mul(5);
    let mut added = 0;

    for link in links {
        let in_frontier = engine.frontier.total_tracked() as u64;
        let budget = engine.successful_downloads.load(Ordering::SeqCst) + in_frontier;
        if budget >= hard_cap {
            debug!("Frontier at hard cap ({hard_cap}), dropping remaining links");
            break;
        }
        let priority = if budget >= soft_cap {
            Priority::Low
        } else {
            Priority::Normal
        };

        if config.restrict_to_seed_domain() {
            let Some(seed_domain) = engine.session.seed_domain() else {
                continue;
            };
            match urlnorm::extract_host(link) {
                Some(host) if host == seed_domain => {}
                _ => continue,
            }
        }

        if engine.frontier.is_visited(link) {
            continue;
        }

        if config.respect_robots_txt()
            && !engine.robots.is_allowed(link, config.user_agent()).await
        {
            continue;
        }

        if engine.frontier.add_url(link, false, priority, next_depth) {
            added += 1;
        }
    }
    added
}

/// Route a failed URL to the retry queue or mark it terminal
#[allow(clippy::too_many_arguments)]
fn handle_failure(
    engine: &Engine,
    item: &QueuedUrlInfo,
    host: &str,
    config: &CrawlConfig,
    kind: FailureKind,
    status_code: u16,
    error: &str,
    transport: Option<TransportErrorKind>,
    retry_after: Option<Duration>,
) {
    if failure::should_retry(kind, item.retry_count, config.max_retries()) {
        let next_retry = item.retry_count + 1;
        let delay = failure::retry_delay(next_retry, &config.retry_policy(), kind, retry_after);
        engine
            .frontier
            .schedule_retry(&item.url, next_retry, error, kind, delay);
        engine.mark_result_retry(item, kind, error, next_retry);
        engine.metrics.record_retry_scheduled();
        // A 429 shapes the host's backoff immediately, not just terminally.
        if kind == FailureKind::HttpRateLimited {
            engine.domains.record_rate_limit(host);
        }
        engine.emit_log(
            LogLevel::Warning,
            format!(
                "Retry {next_retry}/{} scheduled for {} in {delay:?} ({kind}): {error}",
                config.max_retries(),
                item.url
            ),
        );
        return;
    }

    engine.frontier.mark_visited(&item.url);
    if kind == FailureKind::HttpRateLimited {
        engine.domains.record_rate_limit(host);
    } else {
        engine.domains.record_failure(host, kind, error);
    }
    engine.metrics.record_failure(host);

    let error_owned = error.to_string();
    let result = engine.update_result(&item.canonical, |entry| {
        entry.crawl_status = CrawlStatus::Failed;
        entry.status_code = status_code;
        entry.failure_type = Some(kind);
        entry.error_message = Some(error_owned.clone());
        entry.transport_error_code = transport;
        entry.finished_at = Some(chrono::Utc::now());
    });
    if let Some(result) = result {
        engine.push_to_store(result);
    }
    engine.emit_log(
        LogLevel::Error,
        format!("Failed {} permanently ({kind}): {error}", item.url),
    );
}

/// Truncate the raw body to the configured preview unless full content is on
fn raw_content(body: &[u8], config: &CrawlConfig) -> Option<String> {
    if !config.store_raw_content() {
        return None;
    }
    let mut text = String::from_utf8_lossy(body).into_owned();
    if !config.include_full_content() && text.len() > RAW_PREVIEW_BYTES {
        let mut cut = RAW_PREVIEW_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    Some(text)
}

/// Emit the end-of-session summary
fn finish_session(engine: &Engine) {
    let snapshot = engine.metrics.snapshot();
    let (closed, half_open, open) = engine.domains.breaker_state_counts();
    let mut summary = snapshot.summary();
    if closed + half_open + open > 0 {
        summary.push_str(&format!(
            "\n  breakers: {closed} closed, {half_open} half-open, {open} open"
        ));
    }
    info!("Session {} finished: {summary}", engine.session.session_id);
    engine.emit_log(LogLevel::Info, summary);
}
