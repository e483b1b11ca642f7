//! Exchange of page keys for the authoritative image location.
//!
//! The `showpage` API answers with HTML fragments: `i3` holds the displayed
//! image and `i7` the original-image link when the account may fetch it. A
//! used-up quota does not fail explicitly; the site swaps in a placeholder
//! image or keeps the download on its own domain.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::info::GalleryInfo;
use super::keys::KeySet;
use super::utils::{compile_static_regex, decode_html_entities, same_origin, site_root};
use super::{SiteClient, SiteError};

/// Path of the placeholder served once the image quota is exhausted.
pub const QUOTA_PLACEHOLDER_PATH: &str = "/img/509.gif";

static IMG_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*"([^"]+)""#));

static ANCHOR_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?is)<a\b[^>]*?\bhref\s*=\s*"([^"]+)""#));

#[derive(Debug, Serialize)]
struct ShowPageRequest<'a> {
    method: &'static str,
    gid: u64,
    page: u32,
    imgkey: &'a str,
    showkey: &'a str,
}

#[derive(Debug, Deserialize)]
struct ShowPageResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    i3: Option<String>,
    #[serde(default)]
    i7: Option<String>,
}

/// Which fragment the chosen link came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Original-resolution download link.
    Original,
    /// Displayed (resampled) image.
    Displayed,
}

/// Opened download for one page.
#[derive(Debug)]
pub struct ImageLocation {
    /// Final URL after redirects; the file name is taken from it.
    pub url: Url,
    /// Which link was followed.
    pub kind: LinkKind,
    /// Response whose body is the image.
    pub response: Response,
}

/// Resolves and opens the image behind a gallery page.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageLocationResolver;

impl ImageLocationResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Asks the `showpage` API for the page's image link.
    ///
    /// # Errors
    ///
    /// - [`SiteError::QuotaExhausted`] when the displayed image is the placeholder
    /// - [`SiteError::Protocol`] for a rejected key or an unusable response
    /// - [`SiteError::Banned`] and transport errors from the request itself
    #[instrument(level = "debug", skip(self, client, gallery, keys), fields(gallery_id = gallery.id))]
    pub async fn resolve_link(
        &self,
        client: &SiteClient,
        gallery: &GalleryInfo,
        keys: &KeySet,
        page: u32,
    ) -> Result<(Url, LinkKind), SiteError> {
        let root = site_root(&gallery.address);
        let endpoint = root
            .join("api.php")
            .map_err(|e| SiteError::protocol("showpage API", format!("cannot build URL: {e}")))?;
        let imgkey = keys
            .image_key(page)
            .ok_or_else(|| SiteError::protocol("showpage API", format!("no image key for page {page}")))?;
        let request = ShowPageRequest {
            method: "showpage",
            gid: gallery.id,
            page,
            imgkey,
            showkey: keys.show_key(),
        };

        let body = client.post_json(&endpoint, &request).await?;
        let (link, kind) = parse_show_page_response(&body, page)?;
        let url = root
            .join(&link)
            .map_err(|e| SiteError::protocol("showpage API", format!("bad image link {link}: {e}")))?;
        debug!(page, url = %url, ?kind, "image link resolved");
        Ok((url, kind))
    }

    /// Resolves the image link and opens it for streaming.
    ///
    /// Nothing is written locally; quota detection happens here so callers
    /// never save the placeholder.
    ///
    /// # Errors
    ///
    /// Same as [`resolve_link`](Self::resolve_link), plus
    /// [`SiteError::QuotaExhausted`] when the download did not leave the
    /// gallery's own origin.
    #[instrument(skip(self, client, gallery, keys), fields(gallery_id = gallery.id))]
    pub async fn locate(
        &self,
        client: &SiteClient,
        gallery: &GalleryInfo,
        keys: &KeySet,
        page: u32,
    ) -> Result<ImageLocation, SiteError> {
        let (link, kind) = self.resolve_link(client, gallery, keys, page).await?;
        let response = client.open_stream(&link).await?;
        let url = response.url().clone();
        if same_origin(&url, &gallery.address) || url.path().ends_with(QUOTA_PLACEHOLDER_PATH) {
            warn!(page, final_url = %url, "download stayed on gallery origin; quota exhausted");
            return Err(SiteError::QuotaExhausted { page });
        }
        Ok(ImageLocation {
            url,
            kind,
            response,
        })
    }
}

/// Picks the image link out of a `showpage` API response.
///
/// # Errors
///
/// Returns [`SiteError::QuotaExhausted`] for the placeholder image and
/// [`SiteError::Protocol`] for an `error` field, malformed JSON or no link.
pub fn parse_show_page_response(body: &str, page: u32) -> Result<(String, LinkKind), SiteError> {
    let response: ShowPageResponse = serde_json::from_str(body)
        .map_err(|e| SiteError::protocol("showpage API", format!("malformed response: {e}")))?;

    if let Some(error) = response.error {
        return Err(SiteError::protocol(
            "showpage API",
            format!("key rejected for page {page}: {error}"),
        ));
    }

    let displayed = response
        .i3
        .as_deref()
        .and_then(|fragment| first_capture(&IMG_SRC_RE, fragment));
    if displayed
        .as_deref()
        .is_some_and(|src| src.ends_with(QUOTA_PLACEHOLDER_PATH))
    {
        return Err(SiteError::QuotaExhausted { page });
    }

    let original = response
        .i7
        .as_deref()
        .and_then(|fragment| first_capture(&ANCHOR_HREF_RE, fragment));

    match (original, displayed) {
        (Some(link), _) => Ok((link, LinkKind::Original)),
        (None, Some(link)) => Ok((link, LinkKind::Displayed)),
        (None, None) => Err(SiteError::protocol(
            "showpage API",
            format!("no image link for page {page}"),
        )),
    }
}

fn first_capture(re: &Regex, fragment: &str) -> Option<String> {
    re.captures(fragment)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_html_entities(m.as_str()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn response_json(i3: &str, i7: &str) -> String {
        serde_json::json!({ "p": 5, "s": "/s/0000000005/7-5", "i3": i3, "i7": i7 }).to_string()
    }

    #[test]
    fn test_prefers_original_link() {
        let body = response_json(
            r#"<a onclick="return load_image(6)" href="https://site.example/s/x/7-6"><img id="img" src="https://h.example/h/abc/keystamp=1;fileindex=2/5.jpg" /></a>"#,
            r#"<a href="https://site.example/fullimg/7/5/abc/5.jpg?dl=1&amp;x=2">Download original 2000 x 3000 1.2 MiB source</a>"#,
        );
        let (link, kind) = parse_show_page_response(&body, 5).unwrap();
        assert_eq!(kind, LinkKind::Original);
        assert_eq!(link, "https://site.example/fullimg/7/5/abc/5.jpg?dl=1&x=2");
    }

    #[test]
    fn test_falls_back_to_displayed_image() {
        let body = response_json(
            r#"<a href="https://site.example/s/x/7-6"><img id="img" src="https://h.example/h/abc/5.jpg" /></a>"#,
            "",
        );
        let (link, kind) = parse_show_page_response(&body, 5).unwrap();
        assert_eq!(kind, LinkKind::Displayed);
        assert_eq!(link, "https://h.example/h/abc/5.jpg");
    }

    #[test]
    fn test_placeholder_is_quota_exhausted() {
        let body = response_json(
            r#"<a href="https://site.example/s/x/7-6"><img id="img" src="https://site.example/img/509.gif" /></a>"#,
            r#"<a href="https://site.example/fullimg/7/5/abc/5.jpg">Download original</a>"#,
        );
        let err = parse_show_page_response(&body, 5).unwrap_err();
        assert!(matches!(err, SiteError::QuotaExhausted { page: 5 }));
    }

    #[test]
    fn test_error_field_is_protocol_error() {
        let body = r#"{"error":"Key mismatch"}"#;
        let err = parse_show_page_response(body, 3).unwrap_err();
        assert!(matches!(err, SiteError::Protocol { .. }));
        assert!(err.to_string().contains("Key mismatch"));
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        let err = parse_show_page_response("<html>not json</html>", 1).unwrap_err();
        assert!(matches!(err, SiteError::Protocol { .. }));
    }

    #[test]
    fn test_no_links_is_protocol_error() {
        let err = parse_show_page_response(&response_json("<div></div>", ""), 9).unwrap_err();
        assert!(err.to_string().contains("page 9"));
    }

    #[test]
    fn test_request_serializes_expected_fields() {
        let request = ShowPageRequest {
            method: "showpage",
            gid: 7,
            page: 5,
            imgkey: "0000000005",
            showkey: "abcdefghijk",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "method": "showpage",
                "gid": 7,
                "page": 5,
                "imgkey": "0000000005",
                "showkey": "abcdefghijk"
            })
        );
    }
}
