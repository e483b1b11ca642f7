//! Shared network session: credentials, proxy settings and timeouts.
//!
//! The session is read-mostly. Proxy changes go through [`Session::set_proxy`]
//! and only affect clients built by later [`Session::connect`] calls, so a
//! gallery already downloading keeps the settings it started with.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::{Client, Proxy};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::site::{SiteClient, SiteError};
use crate::user_agent;

/// Default timeout for every site request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Proxy endpoints; an empty string means "no proxy" for that scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy for `http://` requests.
    pub http_proxy: String,
    /// Proxy for `https://` requests.
    pub https_proxy: String,
}

impl ProxyConfig {
    /// Creates a proxy configuration, trimming surrounding whitespace.
    #[must_use]
    pub fn new(http_proxy: impl Into<String>, https_proxy: impl Into<String>) -> Self {
        Self {
            http_proxy: http_proxy.into().trim().to_string(),
            https_proxy: https_proxy.into().trim().to_string(),
        }
    }

    /// Whether neither scheme is proxied.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.http_proxy.is_empty() && self.https_proxy.is_empty()
    }
}

/// Login cookies for the members-only site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// `ipb_member_id` cookie.
    pub ipb_member_id: Option<String>,
    /// `ipb_pass_hash` cookie.
    pub ipb_pass_hash: Option<String>,
    /// `igneous` cookie.
    pub igneous: Option<String>,
}

impl Credentials {
    fn cookies(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("ipb_member_id", self.ipb_member_id.as_deref()),
            ("ipb_pass_hash", self.ipb_pass_hash.as_deref()),
            ("igneous", self.igneous.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
    }
}

/// Network session shared by every gallery attempt.
#[derive(Debug)]
pub struct Session {
    cookie_jar: Arc<Jar>,
    proxy: RwLock<ProxyConfig>,
    request_timeout: Duration,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

impl Session {
    /// Creates an anonymous session with no proxy.
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            cookie_jar: Arc::new(Jar::default()),
            proxy: RwLock::new(ProxyConfig::default()),
            request_timeout,
        }
    }

    /// Adds login cookies scoped to `site`.
    #[must_use]
    pub fn with_credentials(self, site: &Url, credentials: &Credentials) -> Self {
        let mut added = 0usize;
        for (name, value) in credentials.cookies() {
            self.cookie_jar
                .add_cookie_str(&format!("{name}={value}; Path=/"), site);
            added += 1;
        }
        debug!(site = %site, cookies = added, "credentials installed");
        self
    }

    /// Replaces the proxy used by subsequently built clients.
    pub fn set_proxy(&self, proxy: ProxyConfig) {
        let mut guard = self.proxy.write().unwrap_or_else(PoisonError::into_inner);
        *guard = proxy;
    }

    /// Current proxy configuration.
    #[must_use]
    pub fn proxy(&self) -> ProxyConfig {
        self.proxy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shared cookie jar.
    #[must_use]
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.cookie_jar)
    }

    /// Request timeout applied to every site call.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Builds a client snapshot from the current settings.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Client`] if a proxy URL is invalid or the client
    /// cannot be built.
    #[instrument(level = "debug", skip(self))]
    pub fn connect(&self) -> Result<SiteClient, SiteError> {
        let proxy = self.proxy();
        let mut builder = Client::builder()
            .cookie_provider(Arc::clone(&self.cookie_jar))
            .connect_timeout(self.request_timeout)
            .read_timeout(self.request_timeout)
            .user_agent(user_agent::random_user_agent())
            .gzip(true)
            .no_proxy();
        if !proxy.http_proxy.is_empty() {
            builder = builder.proxy(Proxy::http(&proxy.http_proxy).map_err(SiteError::Client)?);
        }
        if !proxy.https_proxy.is_empty() {
            builder = builder.proxy(Proxy::https(&proxy.https_proxy).map_err(SiteError::Client)?);
        }
        let client = builder.build().map_err(SiteError::Client)?;
        debug!(direct = proxy.is_direct(), "site client built");
        Ok(SiteClient::new(client, self.request_timeout))
    }
}
