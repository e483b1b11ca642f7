//! Error types for the page download pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::site::SiteError;

/// Errors that can occur while downloading one page.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Failure while resolving the image location (ban, quota, protocol, transport).
    #[error(transparent)]
    Site(#[from] SiteError),

    /// Transport failure while streaming the image body.
    #[error("network error streaming {url}: {source}")]
    Network {
        /// The image URL.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The body stalled longer than the read timeout.
    #[error("timeout streaming {url}")]
    Timeout {
        /// The image URL.
        url: String,
    },

    /// Body ended before the advertised length.
    #[error("truncated stream from {url}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Truncated {
        /// The image URL.
        url: String,
        /// `Content-Length` of the response.
        expected_bytes: u64,
        /// Bytes actually received.
        actual_bytes: u64,
    },

    /// Local filesystem failure (create dir, open, write, rename).
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A task referenced a page the key set does not cover.
    #[error("page {page} is not part of the gallery")]
    UnknownPage {
        /// The page number.
        page: u32,
    },
}

impl DownloadError {
    /// Maps a body-stream transport error onto [`Timeout`](Self::Timeout) or [`Network`](Self::Network).
    pub fn stream(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a truncated-stream error.
    pub fn truncated(url: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            expected_bytes,
            actual_bytes,
        }
    }
}

// No From<std::io::Error> or From<reqwest::Error>: every variant needs the
// path or URL, which only the call site has.
