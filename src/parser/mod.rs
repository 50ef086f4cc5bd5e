//! HTML content extraction
//!
//! Pulls out the title, meta description, visible text, and absolute links
//! from a fetched page. Parsing depth deliberately stops there; anything
//! richer belongs to downstream consumers of the stored content.

use log::debug;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

use crate::urlnorm;

// Compiled once at first use; hardcoded patterns never fail to compile.

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("TITLE_SELECTOR: hardcoded selector is valid"));

static META_DESCRIPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"]"#)
        .expect("META_DESCRIPTION_SELECTOR: hardcoded selector is valid")
});

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("LINK_SELECTOR: hardcoded selector is valid"));

static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("BODY_SELECTOR: hardcoded selector is valid"));

// Script/style/template subtrees carry no visible text; strip them before
// text extraction so inline JS does not pollute the indexable content.
static SCRIPT_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>")
        .expect("SCRIPT_BLOCKS: hardcoded regex is valid")
});

static STYLE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>")
        .expect("STYLE_BLOCKS: hardcoded regex is valid")
});

static NOSCRIPT_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript\s*>")
        .expect("NOSCRIPT_BLOCKS: hardcoded regex is valid")
});

static TEMPLATE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<template\b[^>]*>.*?</template\s*>")
        .expect("TEMPLATE_BLOCKS: hardcoded regex is valid")
});

/// Extraction result for a single page
#[derive(Debug, Clone, Default)]
pub struct ParsedContent {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub text_content: Option<String>,
    /// Absolute canonical links found in the document
    pub links: Vec<String>,
}

/// Stateless HTML parser shared by the worker
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentParser;

impl ContentParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse a fetched body into title/description/text/links
    ///
    /// Non-HTML content types short-circuit to the empty parse. Bodies are
    /// decoded as lossy UTF-8; declared charsets beyond UTF-8 are out of
    /// scope here.
    #[must_use]
    pub fn parse(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        base_url: &str,
        extract_text: bool,
    ) -> ParsedContent {
        if !is_html_content_type(content_type) {
            debug!("Skipping parse of non-HTML content type {content_type:?} for {base_url}");
            return ParsedContent::default();
        }

        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);

        let title = document
            .select(&TITLE_SELECTOR)
            .next()
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .filter(|s| !s.is_empty());

        let meta_description = document
            .select(&META_DESCRIPTION_SELECTOR)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|s| normalize_whitespace(s))
            .filter(|s| !s.is_empty());

        let text_content = if extract_text {
            extract_visible_text(&html)
        } else {
            None
        };

        let links = collect_links(&document, base_url);

        ParsedContent {
            title,
            meta_description,
            text_content,
            links,
        }
    }

    /// Cheap link-only path used when the full parse is not needed
    #[must_use]
    pub fn extract_links(&self, body: &[u8], base_url: &str) -> Vec<String> {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);
        collect_links(&document, base_url)
    }
}

/// Resolve and canonicalize every `a[href]` against the base URL
fn collect_links(document: &Html, base_url: &str) -> Vec<String> {
    let Ok(base) = url::Url::parse(base_url) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        // Fragment-only links point back into the current document
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(joined) = base.join(href) else {
            continue;
        };
        let Some(canonical) = urlnorm::canonicalize(joined.as_str()) else {
            continue;
        };
        if seen.insert(canonical.clone()) {
            links.push(canonical);
        }
    }
    links
}

/// Visible text of the body with scripts/styles stripped and runs of
/// whitespace collapsed
fn extract_visible_text(html: &str) -> Option<String> {
    let stripped = SCRIPT_BLOCKS.replace_all(html, " ");
    let stripped = STYLE_BLOCKS.replace_all(&stripped, " ");
    let stripped = NOSCRIPT_BLOCKS.replace_all(&stripped, " ");
    let stripped = TEMPLATE_BLOCKS.replace_all(&stripped, " ");
    let document = Html::parse_document(&stripped);
    let body = document.select(&BODY_SELECTOR).next()?;
    let text = normalize_whitespace(&body.text().collect::<Vec<_>>().join(" "));
    if text.is_empty() { None } else { Some(text) }
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// HTML detection is permissive: a missing content type is treated as HTML
/// because many small servers omit it on HTML responses.
fn is_html_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml")
        }
    }
}
