//! Gallery queue ledger and the runner that sequences it.
//!
//! # Overview
//!
//! - [`GalleryQueue`] - in-memory ledger of entries and their remaining pages
//! - [`QueueEntry`] / [`EntryStatus`] - one gallery and its lifecycle state
//! - [`QueueEvent`] - change notifications for progress displays
//! - [`QueueRunner`] - drives Waiting entries through key resolution and download
//!
//! Entries move `Waiting -> Preparing -> Downloading -> Completed`. Only one
//! entry may be Preparing or Downloading at a time. Cancellation moves the
//! active entry back to Waiting. A fatal page error leaves the entry
//! Downloading until [`GalleryQueue::requeue`] is called.
//!
//! # Example
//!
//! ```
//! use exdownloader_core::queue::{EntryStatus, GalleryQueue};
//! use exdownloader_core::site::GalleryInfo;
//! use url::Url;
//!
//! let queue = GalleryQueue::new();
//! let id = queue.enqueue(GalleryInfo {
//!     address: Url::parse("https://site.example/g/1/abc/").unwrap(),
//!     id: 1,
//!     display_name: "One".into(),
//!     size_label: String::new(),
//!     page_count: 2,
//!     thumbnail_url: None,
//! });
//! assert_eq!(queue.status(id), Some(EntryStatus::Waiting));
//! assert_eq!(queue.next_waiting(), Some(id));
//! ```

mod entry;
mod error;
mod runner;

pub use entry::{EntryId, EntryStatus, QueueEntry, QueueEvent};
pub use error::QueueError;
pub use runner::{
    FetcherFactory, QueueRunner, RunError, RunOutcome, RunReport, SiteFetcherFactory,
};

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::site::GalleryInfo;
use entry::all_pages;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Ledger {
    next_id: u64,
    entries: Vec<QueueEntry>,
}

impl Ledger {
    fn get_mut(&mut self, id: EntryId) -> Result<&mut QueueEntry, QueueError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(QueueError::UnknownEntry(id))
    }

    fn active(&self) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|entry| entry.status.is_active())
            .map(|entry| entry.id)
    }
}

/// Shared ledger of queued galleries.
///
/// Cloning yields another handle to the same ledger.
#[derive(Debug, Clone)]
pub struct GalleryQueue {
    ledger: Arc<Mutex<Ledger>>,
    events: broadcast::Sender<QueueEvent>,
}

impl Default for GalleryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl GalleryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ledger: Arc::new(Mutex::new(Ledger::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Receives every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Appends a gallery as a Waiting entry.
    #[instrument(skip(self, gallery))]
    pub fn enqueue(&self, gallery: impl Into<Arc<GalleryInfo>>) -> EntryId {
        let gallery = gallery.into();
        let id = {
            let mut ledger = self.lock();
            ledger.next_id += 1;
            let id = EntryId(ledger.next_id);
            ledger.entries.push(QueueEntry::new(id, Arc::clone(&gallery)));
            id
        };
        info!(entry = %id, gallery_id = gallery.id, pages = gallery.page_count, "gallery queued");
        self.publish(QueueEvent::Enqueued { entry: id });
        id
    }

    /// Snapshot of all entries in queue order.
    #[must_use]
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.lock().entries.clone()
    }

    /// Snapshot of one entry.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<QueueEntry> {
        self.lock().entries.iter().find(|e| e.id == id).cloned()
    }

    /// Current status of an entry.
    #[must_use]
    pub fn status(&self, id: EntryId) -> Option<EntryStatus> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.status)
    }

    /// The entry that is Preparing or Downloading, if any.
    #[must_use]
    pub fn active(&self) -> Option<EntryId> {
        self.lock().active()
    }

    /// First Waiting entry in queue order.
    #[must_use]
    pub fn next_waiting(&self) -> Option<EntryId> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.status == EntryStatus::Waiting)
            .map(|e| e.id)
    }

    /// Pages of an entry not yet on disk.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownEntry`] if the id is not in the queue.
    pub fn remaining_pages(&self, id: EntryId) -> Result<BTreeSet<u32>, QueueError> {
        Ok(self.lock().get_mut(id)?.remaining_pages.clone())
    }

    /// Moves a Waiting entry to Preparing and resets its remaining pages.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Busy`] if another entry is active
    /// - [`QueueError::InvalidTransition`] if the entry is not Waiting
    /// - [`QueueError::UnknownEntry`]
    pub fn begin_preparing(&self, id: EntryId) -> Result<Arc<GalleryInfo>, QueueError> {
        let gallery = {
            let mut ledger = self.lock();
            if let Some(active) = ledger.active() {
                return Err(QueueError::Busy { active });
            }
            let entry = ledger.get_mut(id)?;
            expect_status(entry, EntryStatus::Waiting, EntryStatus::Preparing)?;
            entry.status = EntryStatus::Preparing;
            entry.remaining_pages = all_pages(&entry.gallery);
            Arc::clone(&entry.gallery)
        };
        self.status_changed(id, EntryStatus::Preparing);
        Ok(gallery)
    }

    /// Moves a Preparing entry to Downloading.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidTransition`] if the entry is not Preparing
    /// (for example because it was cancelled meanwhile).
    pub fn begin_downloading(&self, id: EntryId) -> Result<(), QueueError> {
        {
            let mut ledger = self.lock();
            let entry = ledger.get_mut(id)?;
            expect_status(entry, EntryStatus::Preparing, EntryStatus::Downloading)?;
            entry.status = EntryStatus::Downloading;
        }
        self.status_changed(id, EntryStatus::Downloading);
        Ok(())
    }

    /// Records a finished page. Ignored unless the entry is Downloading, so
    /// results arriving after a cancel never touch the ledger.
    ///
    /// Returns whether the page was removed from the remaining set.
    pub fn complete_page(&self, id: EntryId, page: u32) -> bool {
        let remaining = {
            let mut ledger = self.lock();
            let Ok(entry) = ledger.get_mut(id) else {
                return false;
            };
            if entry.status != EntryStatus::Downloading || !entry.remaining_pages.remove(&page) {
                return false;
            }
            entry.remaining_pages.len()
        };
        debug!(entry = %id, page, remaining, "page completed");
        self.publish(QueueEvent::PageCompleted {
            entry: id,
            page,
            remaining,
        });
        true
    }

    /// Moves a Downloading entry with no remaining pages to Completed.
    ///
    /// # Errors
    ///
    /// - [`QueueError::PagesRemaining`] if pages are outstanding
    /// - [`QueueError::InvalidTransition`] if the entry is not Downloading
    pub fn mark_completed(&self, id: EntryId) -> Result<(), QueueError> {
        {
            let mut ledger = self.lock();
            let entry = ledger.get_mut(id)?;
            expect_status(entry, EntryStatus::Downloading, EntryStatus::Completed)?;
            if !entry.remaining_pages.is_empty() {
                return Err(QueueError::PagesRemaining {
                    entry: id,
                    remaining: entry.remaining_pages.len(),
                });
            }
            entry.status = EntryStatus::Completed;
        }
        self.status_changed(id, EntryStatus::Completed);
        Ok(())
    }

    /// Puts an entry back to Waiting from any state. Used on cancellation.
    ///
    /// Returns whether the status changed.
    pub fn reset_to_waiting(&self, id: EntryId) -> bool {
        {
            let mut ledger = self.lock();
            let Ok(entry) = ledger.get_mut(id) else {
                return false;
            };
            if entry.status == EntryStatus::Waiting {
                return false;
            }
            entry.status = EntryStatus::Waiting;
        }
        self.status_changed(id, EntryStatus::Waiting);
        true
    }

    /// Explicit retry of a halted (Downloading) or Completed entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidTransition`] while the entry is Preparing.
    pub fn requeue(&self, id: EntryId) -> Result<(), QueueError> {
        {
            let mut ledger = self.lock();
            let entry = ledger.get_mut(id)?;
            match entry.status {
                EntryStatus::Waiting => return Ok(()),
                EntryStatus::Preparing => {
                    return Err(QueueError::InvalidTransition {
                        entry: id,
                        from: entry.status,
                        to: EntryStatus::Waiting,
                    });
                }
                EntryStatus::Downloading | EntryStatus::Completed => {
                    entry.status = EntryStatus::Waiting;
                }
            }
        }
        info!(entry = %id, "entry requeued");
        self.status_changed(id, EntryStatus::Waiting);
        Ok(())
    }

    /// Removes an inactive entry from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Active`] for a Preparing or Downloading entry.
    pub fn remove(&self, id: EntryId) -> Result<QueueEntry, QueueError> {
        let mut ledger = self.lock();
        let position = ledger
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(QueueError::UnknownEntry(id))?;
        if ledger.entries[position].status.is_active() {
            return Err(QueueError::Active(id));
        }
        Ok(ledger.entries.remove(position))
    }

    /// Announces that an attempt on `id` stopped on a fatal condition.
    pub fn publish_halted(&self, id: EntryId, reason: impl Into<String>) {
        self.publish(QueueEvent::Halted {
            entry: id,
            reason: reason.into(),
        });
    }

    fn status_changed(&self, id: EntryId, status: EntryStatus) {
        debug!(entry = %id, %status, "entry status changed");
        self.publish(QueueEvent::StatusChanged { entry: id, status });
    }
}

fn expect_status(
    entry: &QueueEntry,
    expected: EntryStatus,
    to: EntryStatus,
) -> Result<(), QueueError> {
    if entry.status == expected {
        Ok(())
    } else {
        Err(QueueError::InvalidTransition {
            entry: entry.id,
            from: entry.status,
            to,
        })
    }
}
