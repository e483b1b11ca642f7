//! Shared helpers for regex-based page extraction.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Compiles a static regex pattern and panics with context if invalid.
///
/// Only used for compile-time constant patterns held in `LazyLock` statics.
#[must_use]
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));

static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));"));

/// Decodes the HTML entities the site emits in attributes and titles.
///
/// Numeric references (`&#1234;`, `&#x4e2d;`) are decoded when they name a
/// valid character. `&amp;` is decoded last so `&amp;lt;` stays `&lt;`.
#[must_use]
pub fn decode_html_entities(value: &str) -> String {
    let numeric = NUMERIC_ENTITY_RE.replace_all(value, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse().ok(),
            (None, None) => None,
        };
        code.and_then(char::from_u32)
            .map_or_else(|| caps[0].to_string(), String::from)
    });
    numeric
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&hellip;", "\u{2026}")
        .replace("&nbsp;", "\u{00a0}")
        .replace("&amp;", "&")
}

/// Removes markup and collapses whitespace, returning the visible text.
#[must_use]
pub fn visible_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    decode_html_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the site root (`scheme://host[:port]/`) of `address`.
#[must_use]
pub fn site_root(address: &Url) -> Url {
    let mut root = address.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    root
}

/// Whether two URLs share scheme, host and port.
#[must_use]
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
