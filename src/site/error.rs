//! Error types for the gallery site protocol.
//!
//! Every variant carries enough context to tell a stale key from a changed
//! page layout or an exhausted quota without re-running the request.

use thiserror::Error;

use super::ban::BanCondition;

/// Errors produced while talking to the gallery site.
#[derive(Debug, Error)]
pub enum SiteError {
    /// Connection-level failure (DNS, refused, reset, proxy handshake, TLS).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL being requested.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The site answered with its temporary ban notice.
    #[error("IP address temporarily banned, {condition} remaining")]
    Banned {
        /// Parsed remaining lockout.
        condition: BanCondition,
    },

    /// The per-IP image quota is used up; the site substituted its placeholder.
    #[error("image quota exhausted at page {page}")]
    QuotaExhausted {
        /// The page whose location resolution hit the limit.
        page: u32,
    },

    /// The page structure did not match what the parser expects, or a key was rejected.
    #[error("protocol error in {context}: {detail}")]
    Protocol {
        /// Which step was parsing (listing page, show page, showpage API, ...).
        context: String,
        /// What was missing or inconsistent.
        detail: String,
    },

    /// The gallery address is malformed or the gallery does not exist.
    #[error("wrong gallery address {address}: {reason}")]
    WrongAddress {
        /// The address as supplied.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be constructed (bad proxy URL, TLS backend).
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl SiteError {
    /// Maps a transport error onto [`SiteError::Timeout`] or [`SiteError::Network`].
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// Creates a wrong-address error.
    pub fn wrong_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WrongAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Returns the ban condition when this error is a ban.
    #[must_use]
    pub fn ban_condition(&self) -> Option<BanCondition> {
        match self {
            Self::Banned { condition } => Some(*condition),
            _ => None,
        }
    }
}

impl From<BanCondition> for SiteError {
    fn from(condition: BanCondition) -> Self {
        Self::Banned { condition }
    }
}
