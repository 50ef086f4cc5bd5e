//! End-to-end crawl scenarios against local test servers

mod common;

use std::sync::Arc;
use std::time::Duration;

use search_crawler::config::CrawlConfig;
use search_crawler::crawler::{CrawlStatus, Crawler};
use search_crawler::failure::FailureKind;
use search_crawler::store::MemoryContentStore;

use common::{TestResponse, TestServer};

fn config() -> search_crawler::config::CrawlConfigBuilder {
    CrawlConfig::builder().test_mode(true)
}

async fn run_crawler(config: CrawlConfig, seeds: &[String]) -> (Crawler, Arc<MemoryContentStore>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryContentStore::new());
    let crawler = Crawler::new(config, store.clone()).expect("crawler builds");
    crawler.add_seed_urls(seeds);
    crawler.run().await;
    (crawler, store)
}

#[tokio::test]
async fn test_seed_domain_restriction() {
    let server = TestServer::start(|path, _| match path {
        "/robots.txt" => TestResponse::status(404),
        "/" => TestResponse::html(
            r#"<html><body>
                 <a href="/x">internal</a>
                 <a href="http://b.test/y">external</a>
               </body></html>"#,
        ),
        "/x" => TestResponse::html("<html><body>leaf page</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let config = config()
        .max_pages(10)
        .max_depth(1)
        .restrict_to_seed_domain(true)
        .build()
        .expect("valid config");

    let seed = format!("{}/", server.url());
    let (crawler, _store) = run_crawler(config, &[seed.clone()]).await;

    let results = crawler.get_results();
    assert_eq!(results.len(), 2, "b.test must be dropped: {results:?}");
    for result in &results {
        assert_eq!(result.crawl_status, CrawlStatus::Downloaded);
        assert!(result.url.starts_with(&server.url()));
    }
    assert_eq!(crawler.successful_download_count(), 2);
}

#[tokio::test]
async fn test_retry_on_server_error_then_success() {
    let server = TestServer::start(|path, hit| match path {
        "/robots.txt" => TestResponse::status(404),
        "/" if hit < 3 => TestResponse::status(503),
        "/" => TestResponse::html("<html><title>finally</title><body>up</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let config = config()
        .max_pages(5)
        .max_retries(3)
        .base_retry_delay_ms(100)
        .max_retry_delay_ms(10_000)
        .retry_backoff_multiplier(2.0)
        .build()
        .expect("valid config");

    let seed = format!("{}/", server.url());
    let (crawler, _store) = run_crawler(config, &[seed]).await;

    let results = crawler.get_results();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.crawl_status, CrawlStatus::Downloaded);
    assert_eq!(result.retry_count, 3);
    assert!(result.is_retry_attempt);
    assert_eq!(result.title.as_deref(), Some("finally"));
    // Backoff of ~100+200+400ms, each with -20% jitter at worst
    assert!(
        result.total_retry_time >= Duration::from_millis(500),
        "retry time too short: {:?}",
        result.total_retry_time
    );
    assert_eq!(server.hit_count("/").await, 4);
}

#[tokio::test]
async fn test_rate_limit_respects_retry_after() {
    let server = TestServer::start(|path, hit| match path {
        "/robots.txt" => TestResponse::status(404),
        "/" if hit == 0 => TestResponse::status(429).with_header("Retry-After", "2"),
        "/" => TestResponse::html("<html><body>ok now</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let config = config()
        .max_pages(5)
        .max_retries(3)
        .base_retry_delay_ms(100)
        .build()
        .expect("valid config");

    let seed = format!("{}/", server.url());
    let started = std::time::Instant::now();
    let (crawler, _store) = run_crawler(config, &[seed]).await;
    let elapsed = started.elapsed();

    let results = crawler.get_results();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.crawl_status, CrawlStatus::Downloaded);
    assert_eq!(result.retry_count, 1);
    assert!(
        result.total_retry_time >= Duration::from_secs(2),
        "retry fired before Retry-After: {:?}",
        result.total_retry_time
    );
    assert!(elapsed >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_duplicate_seeds_produce_one_result() {
    let server = TestServer::start(|path, _| match path {
        "/robots.txt" => TestResponse::status(404),
        "/" => TestResponse::html("<html><body>single</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let config = config().max_pages(10).build().expect("valid config");
    let seed = format!("{}/", server.url());
    let (crawler, _store) = run_crawler(config, &[seed.clone(), seed]).await;

    assert_eq!(crawler.get_results().len(), 1);
    assert_eq!(crawler.successful_download_count(), 1);
    assert_eq!(server.hit_count("/").await, 1);
}

#[tokio::test]
async fn test_max_pages_caps_downloads_and_link_growth() {
    let links: String = (0..50)
        .map(|i| format!("<a href=\"/p{i}\">{i}</a>"))
        .collect();
    let page = format!("<html><body>{links}</body></html>");

    let server = TestServer::start(move |path, _| match path {
        "/robots.txt" => TestResponse::status(404),
        "/" => TestResponse::html(&page),
        p if p.starts_with("/p") => TestResponse::html("<html><body>leaf</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let config = config()
        .max_pages(2)
        .max_depth(3)
        .build()
        .expect("valid config");

    let seed = format!("{}/", server.url());
    let (crawler, _store) = run_crawler(config, &[seed]).await;

    assert_eq!(crawler.successful_download_count(), 2);
    let results = crawler.get_results();
    assert_eq!(results.len(), 2);

    // Extracted but un-fetched links remain in the frontier, bounded by the
    // 5x hard cap on (downloads + frontier size).
    let leftover = crawler.frontier_size();
    assert!(leftover >= 1, "unfetched links should remain queued");
    assert!(
        crawler.successful_download_count() + leftover as u64 <= 10,
        "hard cap exceeded: {leftover} left over"
    );
}

#[tokio::test]
async fn test_spa_detection_switches_to_gateway() {
    // Page server returns an SPA shell on the direct path.
    let page_server = TestServer::start(|path, _| match path {
        "/robots.txt" => TestResponse::status(404),
        "/" => TestResponse::html(
            r#"<html><head><title>app</title></head>
               <body><div id="root"></div><script src="/bundle.js"></script></body></html>"#,
        ),
        _ => TestResponse::status(404),
    })
    .await;

    let base = page_server.url();
    let rendered_html = format!(
        r#"<html><body>
             <p>Rendered application content with enough visible text.</p>
             <a href="{base}/a">a</a><a href="{base}/b">b</a><a href="{base}/c">c</a>
           </body></html>"#
    );

    // Gateway renders every URL to the same payload.
    let mut gateway = mockito::Server::new_async().await;
    let render_payload = serde_json::json!({
        "statusCode": 200,
        "contentType": "text/html",
        "content": rendered_html,
        "finalUrl": format!("{base}/"),
    });
    let _render = gateway
        .mock("POST", "/render")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(render_payload.to_string())
        .expect_at_least(1)
        .create_async()
        .await;

    let config = config()
        .max_pages(10)
        .max_depth(1)
        .spa_rendering(true, format!("{}/render", gateway.url()))
        .build()
        .expect("valid config");

    let seed = format!("{base}/");
    let (crawler, _store) = run_crawler(config, &[seed]).await;

    assert!(crawler.session().spa_detected());
    assert!(crawler.session().spa_checked());

    let results = crawler.get_results();
    // Seed plus the three links discovered in the rendered HTML
    assert_eq!(results.len(), 4, "results: {results:?}");
    for result in &results {
        assert_eq!(result.crawl_status, CrawlStatus::Downloaded);
    }
    // Only the first request used the direct path
    assert_eq!(page_server.hit_count("/").await, 1);
}

#[tokio::test]
async fn test_unreachable_host_fails_after_retries() {
    let config = config()
        .max_pages(5)
        .max_retries(2)
        .base_retry_delay_ms(50)
        .build()
        .expect("valid config");

    // Port 1 is never listening
    let (crawler, _store) = run_crawler(config, &["http://127.0.0.1:1/".to_string()]).await;

    let results = crawler.get_results();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.crawl_status, CrawlStatus::Failed);
    assert_eq!(result.retry_count, 2, "retries must be exhausted");
    assert!(result.failure_type.is_some());
    assert!(
        result.failure_type.expect("failure kind").is_retryable(),
        "terminal only because retries ran out"
    );
    assert_eq!(crawler.successful_download_count(), 0);
}

#[tokio::test]
async fn test_empty_seed_set_ends_immediately() {
    let config = config().build().expect("valid config");
    let store = Arc::new(MemoryContentStore::new());
    let crawler = Crawler::new(config, store).expect("crawler builds");
    crawler.run().await;
    assert!(crawler.get_results().is_empty());
    assert!(crawler.is_stopped());
}

#[tokio::test]
async fn test_max_pages_zero_fetches_nothing() {
    let server = TestServer::start(|_, _| TestResponse::html("<html></html>")).await;

    let config = config().max_pages(0).build().expect("valid config");
    let seed = format!("{}/", server.url());
    let (crawler, _store) = run_crawler(config, &[seed]).await;

    assert_eq!(crawler.successful_download_count(), 0);
    assert!(crawler.get_results().is_empty());
    assert_eq!(server.hit_count("/").await, 0);
}

#[tokio::test]
async fn test_robots_disallow_is_terminal() {
    let server = TestServer::start(|path, _| match path {
        "/robots.txt" => {
            let mut resp = TestResponse::html("User-agent: *\nDisallow: /private/\n");
            resp.headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
            resp
        }
        "/ok" => TestResponse::html("<html><body>public</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let config = config().max_pages(10).build().expect("valid config");
    let seeds = vec![
        format!("{}/ok", server.url()),
        format!("{}/private/x", server.url()),
    ];
    let (crawler, _store) = run_crawler(config, &seeds).await;

    let results = crawler.get_results();
    assert_eq!(results.len(), 2);

    let ok = results
        .iter()
        .find(|r| r.url.ends_with("/ok"))
        .expect("public page result");
    assert_eq!(ok.crawl_status, CrawlStatus::Downloaded);

    let denied = results
        .iter()
        .find(|r| r.url.ends_with("/private/x"))
        .expect("denied page result");
    assert_eq!(denied.crawl_status, CrawlStatus::Failed);
    assert_eq!(denied.failure_type, Some(FailureKind::RobotsDenied));
    assert_eq!(denied.retry_count, 0, "robots denials never retry");
    assert_eq!(server.hit_count("/private/x").await, 0);
}

#[tokio::test]
async fn test_rehydration_resumes_pending_work() {
    let server = TestServer::start(|path, _| match path {
        "/robots.txt" => TestResponse::status(404),
        "/a" | "/b" | "/c" => TestResponse::html("<html><body>page</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let store = Arc::new(MemoryContentStore::new());
    let session_id = "resume-session".to_string();

    // First crawler downloads one page and leaves the rest pending.
    let config_one = config().max_pages(1).build().expect("valid config");
    let first = Crawler::with_session_id(config_one, store.clone(), session_id.clone())
        .expect("crawler builds");
    first.add_seed_urls(&[
        format!("{}/a", server.url()),
        format!("{}/b", server.url()),
        format!("{}/c", server.url()),
    ]);
    first.run().await;
    assert_eq!(first.successful_download_count(), 1);

    // Let spawned persistence writes settle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.frontier().pending_count(&session_id), 2);

    // A new crawler on the same session picks up the two pending URLs.
    let config_two = config().max_pages(10).build().expect("valid config");
    let second = Crawler::with_session_id(config_two, store.clone(), session_id.clone())
        .expect("crawler builds");
    second.run().await;

    let urls: Vec<String> = second.get_results().iter().map(|r| r.url.clone()).collect();
    assert_eq!(urls.len(), 2, "exactly the pending URLs are re-crawled");
    assert!(urls.iter().all(|u| u.ends_with("/b") || u.ends_with("/c")));
    assert_eq!(second.successful_download_count(), 2);
}

#[tokio::test]
async fn test_per_domain_interval_spaces_requests() {
    let server = TestServer::start(|path, _| match path {
        "/robots.txt" => TestResponse::status(404),
        "/" => TestResponse::html(
            r#"<html><body><a href="/p1">1</a><a href="/p2">2</a></body></html>"#,
        ),
        "/p1" | "/p2" => TestResponse::html("<html><body>leaf</body></html>"),
        _ => TestResponse::status(404),
    })
    .await;

    let config = config()
        .max_pages(10)
        .max_depth(1)
        .per_domain_interval_ms(200)
        .build()
        .expect("valid config");

    let seed = format!("{}/", server.url());
    let started = std::time::Instant::now();
    let (crawler, _store) = run_crawler(config, &[seed]).await;
    let elapsed = started.elapsed();

    assert_eq!(crawler.successful_download_count(), 3);
    // Three same-host fetches require at least two full politeness intervals
    assert!(
        elapsed >= Duration::from_millis(400),
        "requests not spaced: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_stop_halts_worker() {
    let server = TestServer::start(|path, _| match path {
        "/robots.txt" => TestResponse::status(404),
        _ => TestResponse::html(&format!(
            "<html><body><a href=\"{path}l\">next</a></body></html>"
        )),
    })
    .await;

    // An effectively unbounded crawl that only stop() can end: every page
    // links to a fresh URL one level deeper.
    let config = config()
        .max_pages(1_000_000)
        .max_depth(1000)
        .build()
        .expect("valid config");

    let store = Arc::new(MemoryContentStore::new());
    let crawler = Crawler::new(config, store).expect("crawler builds");
    crawler.add_seed_urls(&[format!("{}/", server.url())]);
    crawler.start();

    tokio::time::sleep(Duration::from_millis(300)).await;
    crawler.stop().await;
    assert!(crawler.is_stopped());

    let after = crawler.get_results().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(crawler.get_results().len(), after, "no work after stop");
}
