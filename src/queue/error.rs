//! Error types for queue operations.

use thiserror::Error;

use super::entry::{EntryId, EntryStatus};

/// Errors from [`GalleryQueue`](super::GalleryQueue) transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No entry with this id.
    #[error("unknown queue entry {0}")]
    UnknownEntry(EntryId),

    /// The transition is not allowed from the current status.
    #[error("entry {entry} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The entry.
        entry: EntryId,
        /// Current status.
        from: EntryStatus,
        /// Requested status.
        to: EntryStatus,
    },

    /// Another entry is Preparing or Downloading.
    #[error("entry {active} is already being processed")]
    Busy {
        /// The active entry.
        active: EntryId,
    },

    /// Completion requested while pages are outstanding.
    #[error("entry {entry} still has {remaining} pages outstanding")]
    PagesRemaining {
        /// The entry.
        entry: EntryId,
        /// Number of outstanding pages.
        remaining: usize,
    },

    /// Removal requested for an active entry.
    #[error("entry {0} is active and cannot be removed")]
    Active(EntryId),
}
