//! Per-page image keys and the gallery-wide show key.
//!
//! Listing pages (`?inline_set=ts_m&p=<index>`, 0-based) link every page's
//! detail view as `/s/<imgkey>/<gid>-<page>`. The show key lives in the second
//! `<script>` element of the detail view for page 1.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument};
use url::Url;

use super::info::GalleryInfo;
use super::utils::{compile_static_regex, site_root};
use super::{SiteClient, SiteError};

/// Sentinel index under which the show key is addressed.
pub const SHOW_KEY_INDEX: u32 = 0;

/// Thumbnails per listing page in the `ts_m` layout.
pub const LISTING_PAGE_SIZE: u32 = 40;

static DETAIL_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"/s/(\w{10})/(\d+)-(\d+)\b"));

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<script\b[^>]*>(.*?)</script>"));

static SHOW_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"showkey\s*=\s*"(\w{11})""#));

/// Complete key material for one gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    image_keys: BTreeMap<u32, String>,
    show_key: String,
}

impl KeySet {
    /// Builds a key set, checking it covers exactly pages `1..=page_count`.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Protocol`] when a page is missing or out of range.
    pub fn from_parts(
        image_keys: BTreeMap<u32, String>,
        show_key: impl Into<String>,
        page_count: u32,
    ) -> Result<Self, SiteError> {
        let expected = usize::try_from(page_count).unwrap_or(usize::MAX);
        let covers_range = image_keys.len() == expected
            && image_keys.keys().next() == Some(&1)
            && image_keys.keys().next_back() == Some(&page_count);
        if !covers_range {
            let missing: Vec<u32> = (1..=page_count)
                .filter(|page| !image_keys.contains_key(page))
                .take(10)
                .collect();
            return Err(SiteError::protocol(
                "listing pages",
                format!(
                    "resolved {} keys for {page_count} pages (missing e.g. {missing:?})",
                    image_keys.len()
                ),
            ));
        }
        Ok(Self {
            image_keys,
            show_key: show_key.into(),
        })
    }

    /// Image key for `page`.
    #[must_use]
    pub fn image_key(&self, page: u32) -> Option<&str> {
        self.image_keys.get(&page).map(String::as_str)
    }

    /// Gallery-wide show key.
    #[must_use]
    pub fn show_key(&self) -> &str {
        &self.show_key
    }

    /// Key by index, where [`SHOW_KEY_INDEX`] addresses the show key.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&str> {
        if index == SHOW_KEY_INDEX {
            Some(&self.show_key)
        } else {
            self.image_key(index)
        }
    }

    /// Number of pages covered.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.image_keys.len()
    }

    /// Number of entries including the show key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.image_keys.len() + 1
    }

    /// A key set always holds the show key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Page numbers in ascending order.
    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.image_keys.keys().copied()
    }
}

/// Derives the [`KeySet`] for a gallery.
///
/// One logical unit of work with no internal retry; a timeout is returned
/// to the caller.
#[derive(Debug, Clone)]
pub struct GalleryKeyResolver {
    listing_page_size: u32,
}

impl Default for GalleryKeyResolver {
    fn default() -> Self {
        Self {
            listing_page_size: LISTING_PAGE_SIZE,
        }
    }
}

impl GalleryKeyResolver {
    /// Creates a resolver for the standard listing layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of listing pages needed for `page_count` pages.
    #[must_use]
    pub fn listing_pages(&self, page_count: u32) -> u32 {
        page_count.div_ceil(self.listing_page_size)
    }

    /// Resolves every image key plus the show key.
    ///
    /// # Errors
    ///
    /// - [`SiteError::Banned`] if any fetched page is the ban notice
    /// - [`SiteError::Protocol`] if links, the show key or coverage are wrong
    /// - transport errors ([`SiteError::Timeout`], [`SiteError::Network`], ...)
    #[instrument(skip(self, client, gallery), fields(gallery_id = gallery.id, pages = gallery.page_count))]
    pub async fn resolve(
        &self,
        client: &SiteClient,
        gallery: &GalleryInfo,
    ) -> Result<KeySet, SiteError> {
        if gallery.page_count == 0 {
            return Err(SiteError::protocol("gallery", "gallery reports zero pages"));
        }

        let mut image_keys = BTreeMap::new();
        for index in 0..self.listing_pages(gallery.page_count) {
            let html = client.fetch_page(&gallery.listing_url(Some(index))).await?;
            let found = merge_listing_keys(&mut image_keys, gallery.id, index, &html)?;
            debug!(listing_index = index, found, total = image_keys.len(), "listing page parsed");
        }

        let first_key = image_keys
            .get(&1)
            .cloned()
            .ok_or_else(|| SiteError::protocol("listing pages", "no key for page 1"))?;
        let show_url = show_page_url(&gallery.address, &first_key, gallery.id)?;
        let html = client.fetch_page(&show_url).await?;
        let show_key = extract_show_key(&html)?;

        let keys = KeySet::from_parts(image_keys, show_key, gallery.page_count)?;
        info!(keys = keys.len(), "gallery keys resolved");
        Ok(keys)
    }
}

/// Merges the detail links of one listing page into `keys`.
///
/// Returns the number of links for this gallery found on the page. A page
/// linked twice with the same key is fine; a different key is a collision.
///
/// # Errors
///
/// Returns [`SiteError::Protocol`] when the page has no detail links or a
/// page number collides with a different key.
pub fn merge_listing_keys(
    keys: &mut BTreeMap<u32, String>,
    gallery_id: u64,
    listing_index: u32,
    html: &str,
) -> Result<usize, SiteError> {
    let context = || format!("listing page {listing_index}");
    let mut found = 0usize;
    for caps in DETAIL_LINK_RE.captures_iter(html) {
        let (Some(key), Some(gid), Some(page)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            continue;
        };
        if gid.as_str().parse::<u64>().ok() != Some(gallery_id) {
            continue;
        }
        let page: u32 = page
            .as_str()
            .parse()
            .map_err(|_| SiteError::protocol(context(), format!("bad page number {}", page.as_str())))?;
        found += 1;
        match keys.get(&page) {
            Some(existing) if existing == key.as_str() => {}
            Some(existing) => {
                return Err(SiteError::protocol(
                    context(),
                    format!("page {page} has conflicting keys {existing} and {}", key.as_str()),
                ));
            }
            None => {
                keys.insert(page, key.as_str().to_string());
            }
        }
    }
    if found == 0 {
        return Err(SiteError::protocol(context(), "no detail links found"));
    }
    Ok(found)
}

/// Extracts the show key from the detail view markup.
///
/// # Errors
///
/// Returns [`SiteError::Protocol`] if there is no second script block or it
/// carries no show key.
pub fn extract_show_key(html: &str) -> Result<String, SiteError> {
    let script = SCRIPT_RE
        .captures_iter(html)
        .nth(1)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| SiteError::protocol("show page", "second script block missing"))?;
    SHOW_KEY_RE
        .captures(script.as_str())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| SiteError::protocol("show page", "showkey not found in script block"))
}

fn show_page_url(address: &Url, first_key: &str, gallery_id: u64) -> Result<Url, SiteError> {
    site_root(address)
        .join(&format!("s/{first_key}/{gallery_id}-1"))
        .map_err(|e| SiteError::protocol("show page", format!("cannot build URL: {e}")))
}
