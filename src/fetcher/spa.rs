//! SPA detection heuristic
//!
//! A page is treated as a single-page application shell when its HTML
//! carries negligible visible text outside of script tags and contains a
//! hydration-style mount hook. The predicate is deliberately conservative
//! and fully deterministic for a given input; the orchestrator runs it at
//! most once per session.

use regex::Regex;
use std::sync::LazyLock;

/// Visible text below this many bytes counts as "negligible"
const SPA_TEXT_THRESHOLD: usize = 200;

static SCRIPT_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>")
        .expect("SCRIPT_BLOCKS: hardcoded regex is valid")
});

static STYLE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>")
        .expect("STYLE_BLOCKS: hardcoded regex is valid")
});

static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("TAGS: hardcoded regex is valid"));

/// Mount points and hydration markers emitted by the common SPA frameworks
const HYDRATION_HOOKS: &[&str] = &[
    "id=\"root\"",
    "id='root'",
    "id=\"app\"",
    "id='app'",
    "id=\"___gatsby\"",
    "data-reactroot",
    "data-react-helmet",
    "ng-app",
    "ng-version",
    "data-v-app",
    "__next_data__",
    "window.__initial_state__",
    "window.__nuxt__",
    "window.__sveltekit",
];

/// Decide whether fetched HTML is an SPA shell needing browser rendering
#[must_use]
pub fn is_spa_page(html: &str, url: &str) -> bool {
    if html.is_empty() {
        return false;
    }

    let lower = html.to_ascii_lowercase();
    let has_hook = HYDRATION_HOOKS.iter().any(|hook| lower.contains(hook));
    if !has_hook {
        return false;
    }

    let stripped = SCRIPT_BLOCKS.replace_all(html, " ");
    let stripped = STYLE_BLOCKS.replace_all(&stripped, " ");
    let text = TAGS.replace_all(&stripped, " ");
    let visible_len = text.split_whitespace().map(str::len).sum::<usize>();

    let is_spa = visible_len < SPA_TEXT_THRESHOLD;
    if is_spa {
        log::debug!("SPA shell detected at {url}: {visible_len} visible bytes with hydration hook");
    }
    is_spa
}
