//! Detection of the site's temporary IP ban notice.
//!
//! A banned client receives a bare page instead of the requested content,
//! e.g. "Your IP address has been temporarily banned ... The ban expires in
//! 2 hours and 15 minutes". Any of the three duration parts may be missing.
//! The notice is a bare page with no `<head>`; regular pages quoting the
//! sentence are not bans.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::utils::compile_static_regex;

static BAN_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)has\s+been\s+temporarily\s+banned"));

static HEAD_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?i)<head[\s>]"));

static HOURS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\b(\d{1,4})\s+hours?\b"));

static MINUTES_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\b(\d{1,4})\s+minutes?\b"));

static SECONDS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\b(\d{1,4})\s+seconds?\b"));

/// Remaining lockout parsed from a ban notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BanCondition {
    /// Whole hours remaining.
    pub hours: u32,
    /// Minutes remaining past the hours.
    pub minutes: u32,
    /// Seconds remaining past the minutes.
    pub seconds: u32,
}

impl BanCondition {
    /// Creates a ban condition from its parts.
    #[must_use]
    pub const fn new(hours: u32, minutes: u32, seconds: u32) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }

    /// Total remaining lockout.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        Duration::from_secs(
            u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds),
        )
    }
}

impl fmt::Display for BanCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h {}m {}s", self.hours, self.minutes, self.seconds)
    }
}

/// Returns the ban condition when `page` is the site's ban notice.
///
/// Pages without the marker (the common case) yield `None`, as do full
/// documents with a `<head>`; this never fails.
#[must_use]
pub fn inspect(page: &str) -> Option<BanCondition> {
    if HEAD_RE.is_match(page) {
        return None;
    }
    let marker = BAN_MARKER_RE.find(page)?;
    let notice = &page[marker.end()..];
    Some(BanCondition {
        hours: capture_count(&HOURS_RE, notice),
        minutes: capture_count(&MINUTES_RE, notice),
        seconds: capture_count(&SECONDS_RE, notice),
    })
}

fn capture_count(re: &Regex, text: &str) -> u32 {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}
