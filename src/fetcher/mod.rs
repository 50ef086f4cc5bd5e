//! Page fetching
//!
//! Two fetch strategies sit behind one facade: the direct HTTP path and the
//! headless-browser gateway path used after SPA detection. The switch is
//! one-way for the lifetime of a session; once a site is known to need
//! rendering, the direct path is not used again.

mod spa;

pub use spa::is_spa_page;

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::CrawlConfig;
use crate::failure::TransportErrorKind;

/// Outcome of a single fetch attempt
///
/// `status_code` is zero when the request never produced an HTTP response
/// (transport failure); `transport_error` carries the category in that case.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// URL after redirects; equals the request URL when none occurred
    pub final_url: String,
    pub error_message: Option<String>,
    pub transport_error: Option<TransportErrorKind>,
    /// Parsed `Retry-After` header, when the server sent one
    pub retry_after: Option<Duration>,
}

impl FetchResult {
    /// A fetch succeeds iff the response status is 2xx
    #[must_use]
    pub fn success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    fn transport_failure(url: &str, kind: TransportErrorKind, message: String) -> Self {
        Self {
            status_code: 0,
            content_type: None,
            body: Vec::new(),
            final_url: url.to_string(),
            error_message: Some(message),
            transport_error: Some(kind),
            retry_after: None,
        }
    }
}

/// One concrete way of turning a URL into a [`FetchResult`]
#[async_trait]
trait FetchBackend: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult;
}

/// Build the shared HTTP client from a config snapshot
///
/// The same client backs page fetches and robots.txt fetches so both present
/// identical transport behaviour.
pub fn build_client(config: &CrawlConfig) -> Result<reqwest::Client, reqwest::Error> {
    let redirect_policy = if config.follow_redirects() {
        reqwest::redirect::Policy::limited(config.max_redirects() as usize)
    } else {
        reqwest::redirect::Policy::none()
    };

    reqwest::Client::builder()
        .user_agent(config.user_agent())
        .timeout(config.request_timeout())
        .redirect(redirect_policy)
        .danger_accept_invalid_certs(config.accept_invalid_certs())
        .build()
}

/// Categorize a reqwest error by walking its source chain
fn classify_transport_error(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    if error.is_redirect() {
        return TransportErrorKind::RedirectLoop;
    }

    let mut chain = String::new();
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        chain.push_str(&err.to_string().to_ascii_lowercase());
        chain.push(' ');
        source = err.source();
    }

    if chain.contains("dns") || chain.contains("failed to lookup") || chain.contains("resolve") {
        return TransportErrorKind::Dns;
    }
    if error.is_connect()
        || chain.contains("connection refused")
        || chain.contains("connection reset")
    {
        return TransportErrorKind::ConnectRefused;
    }
    TransportErrorKind::Other
}

/// Parse a `Retry-After` header value: delta-seconds or an HTTP date
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}

/// Direct HTTP GET strategy
struct DirectBackend {
    client: reqwest::Client,
}

#[async_trait]
impl FetchBackend for DirectBackend {
    async fn fetch(&self, url: &str) -> FetchResult {
        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let kind = classify_transport_error(&e);
                debug!("Transport failure ({kind}) fetching {url}: {e}");
                return FetchResult::transport_failure(url, kind, e.to_string());
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                let kind = classify_transport_error(&e);
                warn!("Failed reading body from {url}: {e}");
                return FetchResult::transport_failure(url, kind, e.to_string());
            }
        };

        let error_message = if (200..300).contains(&status) {
            None
        } else {
            Some(format!("HTTP {status}"))
        };

        FetchResult {
            status_code: status,
            content_type,
            body,
            final_url,
            error_message,
            transport_error: None,
            retry_after,
        }
    }
}

/// Request body sent to the headless-browser gateway
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    url: &'a str,
    user_agent: &'a str,
    timeout_ms: u64,
}

/// Rendered response returned by the gateway
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderResponse {
    status_code: u16,
    content_type: Option<String>,
    content: String,
    final_url: Option<String>,
}

/// Headless-browser gateway strategy used in SPA mode
///
/// POSTs the target URL to the gateway and treats the rendered HTML as if it
/// were the direct response.
struct GatewayBackend {
    client: reqwest::Client,
    gateway_url: String,
    user_agent: String,
    timeout_ms: u64,
}

#[async_trait]
impl FetchBackend for GatewayBackend {
    async fn fetch(&self, url: &str) -> FetchResult {
        let request = RenderRequest {
            url,
            user_agent: &self.user_agent,
            timeout_ms: self.timeout_ms,
        };

        // The gateway needs headroom beyond the page timeout to launch and
        // settle the browser.
        let gateway_timeout = Duration::from_millis(self.timeout_ms.saturating_add(15_000));

        let response = match self
            .client
            .post(&self.gateway_url)
            .timeout(gateway_timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let kind = classify_transport_error(&e);
                warn!("Gateway transport failure ({kind}) rendering {url}: {e}");
                return FetchResult::transport_failure(url, kind, e.to_string());
            }
        };

        let gateway_status = response.status().as_u16();
        if !(200..300).contains(&gateway_status) {
            return FetchResult {
                status_code: gateway_status,
                content_type: None,
                body: Vec::new(),
                final_url: url.to_string(),
                error_message: Some(format!("gateway returned HTTP {gateway_status}")),
                transport_error: None,
                retry_after: None,
            };
        }

        let rendered: RenderResponse = match response.json().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Gateway returned unparseable payload for {url}: {e}");
                return FetchResult::transport_failure(
                    url,
                    TransportErrorKind::Other,
                    format!("invalid gateway payload: {e}"),
                );
            }
        };

        let error_message = if (200..300).contains(&rendered.status_code) {
            None
        } else {
            Some(format!("HTTP {} (rendered)", rendered.status_code))
        };

        FetchResult {
            status_code: rendered.status_code,
            content_type: rendered
                .content_type
                .or_else(|| Some("text/html".to_string())),
            body: rendered.content.into_bytes(),
            final_url: rendered.final_url.unwrap_or_else(|| url.to_string()),
            error_message,
            transport_error: None,
            retry_after: None,
        }
    }
}

/// Facade over the two fetch strategies
///
/// Holds the active backend behind a lock so the orchestrator can swap in
/// the gateway path after SPA detection and rebuild the client on config
/// updates; in-flight requests keep the backend they started with.
pub struct PageFetcher {
    backend: RwLock<Arc<dyn FetchBackend>>,
    spa_mode: AtomicBool,
    gateway_url: RwLock<Option<String>>,
}

impl PageFetcher {
    /// Build a fetcher in direct mode from a config snapshot
    pub fn new(config: &CrawlConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(config)?;
        Ok(Self::with_client(client))
    }

    /// Build a fetcher in direct mode around an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            backend: RwLock::new(Arc::new(DirectBackend { client })),
            spa_mode: AtomicBool::new(false),
            gateway_url: RwLock::new(None),
        }
    }

    /// Fetch a URL with the currently active strategy
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let backend = Arc::clone(&self.backend.read());
        backend.fetch(url).await
    }

    /// SPA shell heuristic; see [`is_spa_page`]
    #[must_use]
    pub fn is_spa_page(&self, html: &str, url: &str) -> bool {
        is_spa_page(html, url)
    }

    /// Whether the gateway strategy is active
    #[must_use]
    pub fn spa_mode(&self) -> bool {
        self.spa_mode.load(Ordering::Acquire)
    }

    /// Switch to the headless-browser gateway for all subsequent requests
    ///
    /// The switch is one-way per session: disabling is ignored once the
    /// gateway path is active.
    pub fn set_spa_rendering(&self, enabled: bool, gateway_url: &str, config: &CrawlConfig) {
        if !enabled {
            if self.spa_mode() {
                debug!("Ignoring request to leave SPA mode; the switch is one-way per session");
            }
            return;
        }
        if gateway_url.is_empty() {
            warn!("SPA rendering requested without a gateway URL, staying on direct path");
            return;
        }

        let backend = Arc::new(GatewayBackend {
            client: reqwest::Client::new(),
            gateway_url: gateway_url.to_string(),
            user_agent: config.user_agent().to_string(),
            timeout_ms: config.request_timeout().as_millis() as u64,
        });
        *self.backend.write() = backend;
        *self.gateway_url.write() = Some(gateway_url.to_string());
        self.spa_mode.store(true, Ordering::Release);
        debug!("Fetcher switched to headless-browser gateway at {gateway_url}");
    }

    /// Rebuild the active strategy from a new config snapshot
    ///
    /// Called on `update_config`; preserves SPA mode when already switched.
    pub fn rebuild(&self, config: &CrawlConfig) -> Result<(), reqwest::Error> {
        if self.spa_mode() {
            let gateway_url = self.gateway_url.read().clone();
            if let Some(gateway_url) = gateway_url {
                let backend = Arc::new(GatewayBackend {
                    client: reqwest::Client::new(),
                    gateway_url,
                    user_agent: config.user_agent().to_string(),
                    timeout_ms: config.request_timeout().as_millis() as u64,
                });
                *self.backend.write() = backend;
                return Ok(());
            }
        }
        let client = build_client(config)?;
        *self.backend.write() = Arc::new(DirectBackend { client });
        Ok(())
    }
}
