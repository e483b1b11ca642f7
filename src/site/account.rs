//! Account image limit readout from the site's home page.

use std::sync::LazyLock;

use regex::Regex;
use tracing::instrument;
use url::Url;

use super::utils::{compile_static_regex, visible_text};
use super::{SiteClient, SiteError};

static HOMEBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?is)<div\s+class="homebox"[^>]*>(.*?)</div>"#));

static STRONG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<strong[^>]*>(.*?)</strong>"));

/// Image quota usage of the logged-in account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountLimits {
    /// Points used in the current period.
    pub used: u64,
    /// Maximum points for the period.
    pub limit: u64,
}

impl AccountLimits {
    /// Points left before the quota placeholder starts appearing.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

/// Fetches the account limits from `home_url`.
///
/// # Errors
///
/// Returns [`SiteError::Banned`] for the ban notice, [`SiteError::Protocol`]
/// if the limits box is missing, and transport errors otherwise.
#[instrument(skip(client), fields(url = %home_url))]
pub async fn fetch_account_limits(
    client: &SiteClient,
    home_url: &Url,
) -> Result<AccountLimits, SiteError> {
    let html = client.fetch_page(home_url).await?;
    parse_account_limits(&html)
}

/// Parses the first two `<strong>` values of the limits box.
///
/// # Errors
///
/// Returns [`SiteError::Protocol`] if the box or its values are missing.
pub fn parse_account_limits(html: &str) -> Result<AccountLimits, SiteError> {
    let homebox = HOMEBOX_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| SiteError::protocol("home page", "limits box not found (not logged in?)"))?;

    let values: Vec<u64> = STRONG_RE
        .captures_iter(homebox.as_str())
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| visible_text(m.as_str()).replace(',', "").parse().ok())
        .take(2)
        .collect();

    match values.as_slice() {
        [used, limit] => Ok(AccountLimits {
            used: *used,
            limit: *limit,
        }),
        _ => Err(SiteError::protocol("home page", "limit values not found")),
    }
}
