//! Queue entry types and status definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::site::GalleryInfo;

/// Identifier of a queue entry, unique within one [`GalleryQueue`](super::GalleryQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Queued; picked up when nothing else is active.
    Waiting,
    /// Keys are being resolved.
    Preparing,
    /// Pages are being downloaded, or a fatal error stopped them.
    Downloading,
    /// Every page is on disk.
    Completed,
}

impl EntryStatus {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Preparing => "preparing",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
        }
    }

    /// Whether the entry holds the single active slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Preparing | Self::Downloading)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "preparing" => Ok(Self::Preparing),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("invalid entry status: {s}")),
        }
    }
}

/// A gallery in the download queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Queue-local identifier.
    pub id: EntryId,
    /// Gallery metadata.
    pub gallery: Arc<GalleryInfo>,
    /// Current state.
    pub status: EntryStatus,
    /// Pages not yet on disk.
    pub remaining_pages: BTreeSet<u32>,
}

impl QueueEntry {
    pub(crate) fn new(id: EntryId, gallery: Arc<GalleryInfo>) -> Self {
        let remaining_pages = all_pages(&gallery);
        Self {
            id,
            gallery,
            status: EntryStatus::Waiting,
            remaining_pages,
        }
    }

    /// Pages already on disk.
    #[must_use]
    pub fn completed_pages(&self) -> usize {
        (self.gallery.page_count as usize).saturating_sub(self.remaining_pages.len())
    }
}

pub(crate) fn all_pages(gallery: &GalleryInfo) -> BTreeSet<u32> {
    (1..=gallery.page_count).collect()
}

/// Notification published whenever the ledger changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// An entry was added.
    Enqueued {
        /// The new entry.
        entry: EntryId,
    },
    /// An entry moved to a new status.
    StatusChanged {
        /// The entry.
        entry: EntryId,
        /// Its new status.
        status: EntryStatus,
    },
    /// A page finished.
    PageCompleted {
        /// The entry.
        entry: EntryId,
        /// Page number.
        page: u32,
        /// Pages still outstanding.
        remaining: usize,
    },
    /// A gallery attempt stopped on a fatal condition.
    Halted {
        /// The entry.
        entry: EntryId,
        /// Human-readable reason.
        reason: String,
    },
}
