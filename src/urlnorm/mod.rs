//! Canonical URL handling for frontier deduplication
//!
//! All frontier and visited-set comparisons run on the canonical form of a
//! URL: scheme and host lowercased, `www.` stripped, default ports removed,
//! duplicate path slashes collapsed, query parameters sorted with tracking
//! parameters removed, and the fragment dropped. The original URL is kept
//! untouched for fetching.

use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// Query-string keys stripped during canonicalization, beyond the `utm_`
/// prefix family. The set is closed and initialized once per process.
static TRACKING_PARAMS: OnceLock<HashSet<&'static str>> = OnceLock::new();

fn tracking_params() -> &'static HashSet<&'static str> {
    TRACKING_PARAMS.get_or_init(|| {
        [
            "fbclid",
            "gclid",
            "gclsrc",
            "dclid",
            "msclkid",
            "twclid",
            "yclid",
            "igshid",
            "wbraid",
            "gbraid",
            "mc_cid",
            "mc_eid",
            "mkt_tok",
            "vero_id",
            "vero_conv",
            "_hsenc",
            "_hsmi",
            "s_kwcid",
            "ef_id",
            "spm",
            "scm",
            "ref_src",
            "ref_url",
            "cmpid",
            "icid",
            "fb_action_ids",
            "fb_action_types",
            "fb_ref",
            "fb_source",
            "ga_source",
            "ga_medium",
            "ga_term",
            "ga_content",
            "ga_campaign",
            "oly_anon_id",
            "oly_enc_id",
            "otc",
            "wickedid",
            "soc_src",
            "soc_trk",
            "rb_clickid",
            "trk",
            "trkCampaign",
            "sc_campaign",
            "sc_channel",
            "sc_content",
            "sc_geo",
            "sc_outcome",
            "hsa_acc",
            "hsa_cam",
            "hsa_grp",
            "hsa_ad",
            "hsa_src",
            "hsa_tgt",
            "hsa_kw",
            "hsa_mt",
            "hsa_net",
            "hsa_ver",
            "pk_campaign",
            "pk_kwd",
            "pk_source",
            "pk_medium",
            "piwik_campaign",
            "piwik_kwd",
        ]
        .into_iter()
        .collect()
    })
}

/// Check whether a query parameter name is in the closed tracking set
#[must_use]
pub fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || tracking_params().contains(lower.as_str())
}

/// Strip a leading `www.` label from a host
fn strip_www(host: &str) -> &str {
    if host.len() > 4 && host.starts_with("www.") {
        &host[4..]
    } else {
        host
    }
}

/// Collapse runs of `/` in a path into a single slash
fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

/// Canonicalize a URL for frontier comparison
///
/// Returns `None` for anything that is not an absolute http(s) URL with a
/// host: relative references, `javascript:`/`mailto:`/`data:` links, and
/// fragment-only links all yield `None`.
///
/// The transformation is idempotent: `canonicalize(canonicalize(u)) ==
/// canonicalize(u)`.
#[must_use]
pub fn canonicalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let mut url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let host = url.host_str()?.to_ascii_lowercase();
    let host = strip_www(&host).to_string();
    url.set_host(Some(&host)).ok()?;

    // The url crate already drops the port when it equals the scheme default;
    // an explicit default port still needs to go.
    match (url.scheme(), url.port()) {
        ("http", Some(80)) | ("https", Some(443)) => {
            url.set_port(None).ok()?;
        }
        _ => {}
    }

    let path = collapse_slashes(url.path());
    url.set_path(&path);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish();
        url.set_query(Some(&query));
    }

    url.set_fragment(None);

    Some(url.to_string())
}

/// Extract the comparison form of a URL's host: lowercased, `www.` stripped
///
/// The original URL is preserved elsewhere for fetching; this form is only
/// used for per-domain state and domain restriction checks.
#[must_use]
pub fn extract_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some(strip_www(&host).to_string())
}

/// Check whether a URL is a fetchable http(s) link
#[must_use]
pub fn is_fetchable_url(raw: &str) -> bool {
    canonicalize(raw).is_some()
}
