//! Failure classification and the pause between retry waves.
//!
//! Transient failures are never retried one by one. The page stays in the
//! entry's remaining set and is resubmitted once the current wave has fully
//! drained, after [`wave_delay`]. Fatal failures halt the gallery.
//!
//! ```
//! use exdownloader_core::download::{DownloadError, FailureType, classify_error};
//! use exdownloader_core::site::SiteError;
//!
//! let quota = DownloadError::from(SiteError::QuotaExhausted { page: 5 });
//! assert_eq!(classify_error(&quota), FailureType::Fatal);
//!
//! let timeout = DownloadError::from(SiteError::Timeout { url: "https://h.example/1.jpg".into() });
//! assert_eq!(classify_error(&timeout), FailureType::Transient);
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;
use crate::site::SiteError;

/// Default pause between the end of a wave and the next one.
pub const DEFAULT_WAVE_DELAY: Duration = Duration::from_secs(2);

/// Maximum jitter added to the wave delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a page failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Retried in the next wave: timeouts, resets, proxy failures,
    /// truncated streams, 5xx/408/429.
    Transient,

    /// Halts the gallery: ban, quota, protocol, filesystem, other statuses.
    Fatal,
}

/// Classifies a page download error.
#[must_use]
#[instrument(level = "debug", skip(error), fields(error = %error))]
pub fn classify_error(error: &DownloadError) -> FailureType {
    let failure_type = match error {
        DownloadError::Site(site) => classify_site_error(site),
        DownloadError::Network { source, .. } => classify_transport(source),
        DownloadError::Timeout { .. } | DownloadError::Truncated { .. } => FailureType::Transient,
        DownloadError::Io { .. } | DownloadError::UnknownPage { .. } => FailureType::Fatal,
    };
    debug!(?failure_type, "classified download error");
    failure_type
}

/// Classifies a protocol-layer error.
#[must_use]
pub fn classify_site_error(error: &SiteError) -> FailureType {
    match error {
        SiteError::Timeout { .. } => FailureType::Transient,
        SiteError::Network { source, .. } => classify_transport(source),
        SiteError::HttpStatus { status, .. } => classify_status(*status),
        SiteError::Banned { .. }
        | SiteError::QuotaExhausted { .. }
        | SiteError::Protocol { .. }
        | SiteError::WrongAddress { .. }
        | SiteError::Client(_) => FailureType::Fatal,
    }
}

fn classify_transport(source: &reqwest::Error) -> FailureType {
    if source.is_builder() || source.is_redirect() {
        FailureType::Fatal
    } else {
        FailureType::Transient
    }
}

/// Classifies an HTTP status code.
#[must_use]
pub fn classify_status(status: u16) -> FailureType {
    match status {
        408 | 429 | 500..=599 => FailureType::Transient,
        _ => FailureType::Fatal,
    }
}

/// Delay before the next wave: `base` plus up to 500ms of jitter.
#[must_use]
pub fn wave_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis());
    base + Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::site::BanCondition;

    #[test]
    fn test_transient_errors() {
        let cases = [
            DownloadError::from(SiteError::Timeout { url: "u".into() }),
            DownloadError::from(SiteError::http_status("u", 503)),
            DownloadError::from(SiteError::http_status("u", 429)),
            DownloadError::from(SiteError::http_status("u", 408)),
            DownloadError::Timeout { url: "u".into() },
            DownloadError::truncated("u", 10, 3),
        ];
        for error in &cases {
            assert_eq!(classify_error(error), FailureType::Transient, "{error}");
        }
    }

    #[test]
    fn test_fatal_errors() {
        let cases = [
            DownloadError::from(SiteError::QuotaExhausted { page: 5 }),
            DownloadError::from(SiteError::from(BanCondition::new(1, 0, 0))),
            DownloadError::from(SiteError::protocol("showpage API", "key rejected")),
            DownloadError::from(SiteError::http_status("u", 404)),
            DownloadError::from(SiteError::http_status("u", 403)),
            DownloadError::io(
                PathBuf::from("/x"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            ),
            DownloadError::UnknownPage { page: 99 },
        ];
        for error in &cases {
            assert_eq!(classify_error(error), FailureType::Fatal, "{error}");
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Port 9 (discard) on localhost is almost never listening.
        let error = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        let error = DownloadError::from(SiteError::from_reqwest("http://127.0.0.1:9/", error));
        assert_eq!(classify_error(&error), FailureType::Transient);
    }

    #[test]
    fn test_wave_delay_bounds() {
        assert_eq!(wave_delay(Duration::ZERO), Duration::ZERO);
        for _ in 0..20 {
            let delay = wave_delay(Duration::from_secs(1));
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }
}
