//! Gallery information fetch with metadata cache lookup.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::utils::{compile_static_regex, decode_html_entities, visible_text};
use super::{SiteClient, SiteError};
use crate::cache::MetadataCache;

static JAPANESE_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?s)<h1\s+id="gj"[^>]*>(.*?)</h1>"#));

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?s)<h1\s+id="gn"[^>]*>(.*?)</h1>"#));

static DETAIL_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?s)<td\s+class="gdt2"[^>]*>(.*?)</td>"#));

static PAGE_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^(\d+)\s+pages?$"));

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^\d+(?:\.\d+)?\s*[KMGT]i?B$"));

static THUMBNAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<div\s+id="gd1"[^>]*>\s*<div[^>]*style="[^"]*url\(([^)]+)\)"#)
});

const NOT_FOUND_MARKERS: &[&str] = &["Gallery not found.", "Key missing"];

/// Immutable description of a gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryInfo {
    /// Gallery address, e.g. `https://site/g/<id>/<token>/`.
    pub address: Url,
    /// Numeric gallery id taken from the address.
    pub id: u64,
    /// Title (original-language title when the site provides one).
    pub display_name: String,
    /// Human readable size, e.g. `"48.2 MiB"`.
    pub size_label: String,
    /// Number of pages (images).
    pub page_count: u32,
    /// Cover thumbnail location.
    pub thumbnail_url: Option<String>,
}

impl GalleryInfo {
    /// Address with the listing query applied, as the site expects it.
    #[must_use]
    pub fn listing_url(&self, listing_index: Option<u32>) -> Url {
        listing_url(&self.address, listing_index)
    }
}

/// Extracts the numeric gallery id from a `/g/<id>/<token>/` address.
///
/// # Errors
///
/// Returns [`SiteError::WrongAddress`] if the address does not name a gallery.
pub fn parse_gallery_address(address: &str) -> Result<(Url, u64), SiteError> {
    let url = Url::parse(address.trim())
        .map_err(|e| SiteError::wrong_address(address, format!("not a URL ({e})")))?;
    let mut segments = url
        .path_segments()
        .ok_or_else(|| SiteError::wrong_address(address, "address has no path"))?;
    let id = loop {
        match segments.next() {
            Some("g") => {
                break segments
                    .next()
                    .and_then(|segment| segment.parse::<u64>().ok())
                    .ok_or_else(|| SiteError::wrong_address(address, "missing gallery id"))?;
            }
            Some(_) => {}
            None => return Err(SiteError::wrong_address(address, "not a gallery address")),
        }
    };
    Ok((url, id))
}

fn listing_url(address: &Url, listing_index: Option<u32>) -> Url {
    let mut url = address.clone();
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("inline_set", "ts_m");
        if let Some(index) = listing_index {
            pairs.append_pair("p", &index.to_string());
        }
    }
    url
}

/// Parses the gallery front page.
///
/// # Errors
///
/// Returns [`SiteError::WrongAddress`] for the not-found page and
/// [`SiteError::Protocol`] when the title or page count cannot be located.
pub fn parse_gallery_page(address: Url, id: u64, html: &str) -> Result<GalleryInfo, SiteError> {
    if NOT_FOUND_MARKERS.iter().any(|marker| html.contains(marker)) {
        return Err(SiteError::wrong_address(address.as_str(), "gallery not found"));
    }

    let display_name = [&*JAPANESE_TITLE_RE, &*TITLE_RE]
        .into_iter()
        .filter_map(|re| re.captures(html))
        .filter_map(|caps| caps.get(1).map(|m| visible_text(m.as_str())))
        .find(|title| !title.is_empty())
        .ok_or_else(|| SiteError::protocol("gallery page", "title not found"))?;

    let cells: Vec<String> = DETAIL_CELL_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| visible_text(m.as_str())))
        .collect();

    let page_count = cells
        .iter()
        .find_map(|cell| PAGE_COUNT_RE.captures(cell))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| SiteError::protocol("gallery page", "page count not found"))?;

    let size_label = cells
        .iter()
        .find(|cell| SIZE_RE.is_match(cell))
        .cloned()
        .unwrap_or_default();

    let thumbnail_url = THUMBNAIL_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_html_entities(m.as_str().trim_matches(|c| c == '\'' || c == '"')));

    Ok(GalleryInfo {
        address,
        id,
        display_name,
        size_label,
        page_count,
        thumbnail_url,
    })
}

/// Gallery information source backed by the metadata cache.
#[derive(Clone)]
pub struct GalleryCatalog {
    cache: Arc<dyn MetadataCache>,
}

impl std::fmt::Debug for GalleryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryCatalog").finish_non_exhaustive()
    }
}

impl GalleryCatalog {
    /// Creates a catalog over `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn MetadataCache>) -> Self {
        Self { cache }
    }

    /// Returns gallery information, from the cache when present.
    ///
    /// Cache failures are logged and fall through to the network.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::WrongAddress`] for malformed or unknown galleries,
    /// [`SiteError::Banned`] for the ban notice, and network/protocol errors.
    #[instrument(skip(self, client))]
    pub async fn information(
        &self,
        client: &SiteClient,
        address: &str,
    ) -> Result<GalleryInfo, SiteError> {
        let (url, id) = parse_gallery_address(address)?;

        match self.cache.lookup(id).await {
            Ok(Some(cached)) => {
                debug!(gallery_id = id, "gallery information served from cache");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(error) => warn!(gallery_id = id, %error, "metadata cache lookup failed"),
        }

        let html = client.fetch_page(&listing_url(&url, None)).await?;
        let gallery = parse_gallery_page(url, id, &html)?;
        info!(
            gallery_id = id,
            title = %gallery.display_name,
            pages = gallery.page_count,
            "gallery information fetched"
        );

        if let Err(error) = self.cache.bulk_insert(std::slice::from_ref(&gallery)).await {
            warn!(gallery_id = id, %error, "metadata cache insert failed");
        }
        Ok(gallery)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FRONT_PAGE: &str = r#"<html><body>
        <div id="gd1"><div style="width:250px; height:354px; background:transparent url(https://img.example/t/ab/cd/abcd-123.jpg) no-repeat"></div></div>
        <div id="gd2"><h1 id="gn">Sample Gallery &amp; Friends</h1><h1 id="gj"></h1></div>
        <table>
          <tr><td class="gdt1">Posted:</td><td class="gdt2">2024-01-01 10:00</td></tr>
          <tr><td class="gdt1">Parent:</td><td class="gdt2">None</td></tr>
          <tr><td class="gdt1">Visible:</td><td class="gdt2">Yes</td></tr>
          <tr><td class="gdt1">Language:</td><td class="gdt2">Japanese &nbsp;</td></tr>
          <tr><td class="gdt1">File Size:</td><td class="gdt2">48.21 MiB</td></tr>
          <tr><td class="gdt1">Length:</td><td class="gdt2">85 pages</td></tr>
        </table></body></html>"#;

    #[test]
    fn test_parse_gallery_address_extracts_id() {
        let (url, id) = parse_gallery_address("https://site.example/g/123456/0a1b2c3d4e/").unwrap();
        assert_eq!(id, 123_456);
        assert_eq!(url.host_str(), Some("site.example"));
    }

    #[test]
    fn test_parse_gallery_address_rejects_non_gallery() {
        for bad in [
            "not a url",
            "https://site.example/s/abcdefghij/1-1",
            "https://site.example/g/notanumber/x/",
            "https://site.example/g/",
        ] {
            let err = parse_gallery_address(bad).unwrap_err();
            assert!(matches!(err, SiteError::WrongAddress { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn test_listing_url_appends_index() {
        let (url, _) = parse_gallery_address("https://site.example/g/1/abc/?old=1").unwrap();
        assert_eq!(
            listing_url(&url, Some(2)).as_str(),
            "https://site.example/g/1/abc/?inline_set=ts_m&p=2"
        );
        assert_eq!(
            listing_url(&url, None).as_str(),
            "https://site.example/g/1/abc/?inline_set=ts_m"
        );
    }

    #[test]
    fn test_parse_gallery_page_fields() {
        let (url, id) = parse_gallery_address("https://site.example/g/1/abc/").unwrap();
        let gallery = parse_gallery_page(url, id, FRONT_PAGE).unwrap();
        assert_eq!(gallery.display_name, "Sample Gallery & Friends");
        assert_eq!(gallery.page_count, 85);
        assert_eq!(gallery.size_label, "48.21 MiB");
        assert_eq!(
            gallery.thumbnail_url.as_deref(),
            Some("https://img.example/t/ab/cd/abcd-123.jpg")
        );
    }

    #[test]
    fn test_parse_gallery_page_prefers_japanese_title() {
        let html = FRONT_PAGE.replace(r#"<h1 id="gj"></h1>"#, r#"<h1 id="gj">原題</h1>"#);
        let (url, id) = parse_gallery_address("https://site.example/g/1/abc/").unwrap();
        let gallery = parse_gallery_page(url, id, &html).unwrap();
        assert_eq!(gallery.display_name, "原題");
    }

    #[test]
    fn test_parse_gallery_page_decodes_numeric_entities_in_title() {
        let html = FRONT_PAGE.replace(
            r#"<h1 id="gj"></h1>"#,
            r#"<h1 id="gj">&#21407;&#x984C;&nbsp;Vol.&#12288;2</h1>"#,
        );
        let (url, id) = parse_gallery_address("https://site.example/g/1/abc/").unwrap();
        let gallery = parse_gallery_page(url, id, &html).unwrap();
        assert_eq!(gallery.display_name, "原題 Vol. 2");
    }

    #[test]
    fn test_parse_gallery_page_not_found_is_wrong_address() {
        let (url, id) = parse_gallery_address("https://site.example/g/1/abc/").unwrap();
        let err = parse_gallery_page(url, id, "<p>Key missing, or incorrect key provided.</p>")
            .unwrap_err();
        assert!(matches!(err, SiteError::WrongAddress { .. }));
    }

    #[test]
    fn test_parse_gallery_page_without_length_is_protocol_error() {
        let html = FRONT_PAGE.replace("85 pages", "unknown");
        let (url, id) = parse_gallery_address("https://site.example/g/1/abc/").unwrap();
        let err = parse_gallery_page(url, id, &html).unwrap_err();
        assert!(matches!(err, SiteError::Protocol { .. }));
    }
}
