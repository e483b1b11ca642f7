//! Wave-based page download orchestration for one gallery at a time.
//!
//! # Overview
//!
//! [`DownloadOrchestrator::submit`] dispatches every outstanding page of a
//! queue entry as a wave of tokio tasks. A semaphore keeps at most
//! `concurrency` of them executing. Results come back to the orchestrator,
//! which alone touches the queue ledger:
//!
//! - success removes the page from the entry's remaining set
//! - a transient failure leaves it there for the next wave
//! - a fatal failure stops tasks that have not started yet; the first fatal
//!   error is reported once the wave has drained
//!
//! When a wave drains without a fatal error and pages remain, the remaining
//! pages are resubmitted after the wave delay. This repeats until the entry
//! completes, a fatal error occurs, or the run is cancelled.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exdownloader_core::download::{DownloadOrchestrator, LocalFilesystem, SitePageFetcher};
//! # use exdownloader_core::download::DownloadTask;
//! # use exdownloader_core::queue::{EntryId, GalleryQueue};
//! # use exdownloader_core::site::SiteClient;
//!
//! # async fn example(queue: GalleryQueue, entry: EntryId, client: SiteClient, tasks: Vec<DownloadTask>) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = DownloadOrchestrator::new(3)?;
//! let fetcher = Arc::new(SitePageFetcher::new(client, Arc::new(LocalFilesystem)));
//! let run = orchestrator.submit(&queue, entry, fetcher, tasks).await?;
//! println!("{run:?}");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::fetch::{PageFetcher, PageOutcome};
use super::retry::{DEFAULT_WAVE_DELAY, FailureType, classify_error, wave_delay};
use super::task::DownloadTask;
use crate::queue::{EntryId, GalleryQueue, QueueError};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 5;

/// Default number of simultaneous page downloads.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Error type for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Ledger operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Another gallery is already being downloaded.
    #[error("orchestrator busy with entry {active}")]
    Busy {
        /// The entry currently being downloaded.
        active: EntryId,
    },

    /// Pages remain for which no task was submitted.
    #[error("entry {entry} has remaining pages without tasks: {pages:?}")]
    MissingTasks {
        /// The entry.
        entry: EntryId,
        /// Pages without a task.
        pages: Vec<u32>,
    },
}

/// Terminal result of [`DownloadOrchestrator::submit`].
#[derive(Debug)]
pub enum GalleryRun {
    /// Every page succeeded; the entry is Completed.
    Completed,
    /// A fatal error stopped the gallery; the entry stays Downloading.
    Halted(DownloadError),
    /// [`DownloadOrchestrator::cancel`] was called; the entry is Waiting.
    Cancelled,
}

/// Counters for pages processed by the orchestrator.
///
/// Atomic so spawned tasks can update them without the ledger lock.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    transient_failures: AtomicUsize,
    fatal_failures: AtomicUsize,
    waves: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages written to disk.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Pages skipped because the file already existed.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Failures left for the next wave.
    #[must_use]
    pub fn transient_failures(&self) -> usize {
        self.transient_failures.load(Ordering::SeqCst)
    }

    /// Failures that halted a gallery (including duplicates in the same wave).
    #[must_use]
    pub fn fatal_failures(&self) -> usize {
        self.fatal_failures.load(Ordering::SeqCst)
    }

    /// Waves dispatched.
    #[must_use]
    pub fn waves(&self) -> usize {
        self.waves.load(Ordering::SeqCst)
    }

    /// Tasks executing right now.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of tasks observed executing at once.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn task_started(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn task_finished(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrements the active counter even if the fetch future panics.
struct ActiveTaskGuard(Arc<DownloadStats>);

impl ActiveTaskGuard {
    fn start(stats: &Arc<DownloadStats>) -> Self {
        stats.task_started();
        Self(Arc::clone(stats))
    }
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

#[derive(Debug, Clone)]
struct ActiveRun {
    queue: GalleryQueue,
    entry: EntryId,
    token: CancellationToken,
}

/// Clears the active-run slot when `submit` returns.
struct ActiveRunSlot<'a>(&'a Mutex<Option<ActiveRun>>);

impl Drop for ActiveRunSlot<'_> {
    fn drop(&mut self) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

enum TaskReport {
    Finished(Result<PageOutcome, DownloadError>),
    NotStarted,
}

enum WaveOutcome {
    Drained,
    Fatal(DownloadError),
    Cancelled,
}

/// Bounded worker pool driving one gallery's pages to completion.
#[derive(Debug)]
pub struct DownloadOrchestrator {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    wave_delay: Duration,
    stats: Arc<DownloadStats>,
    active: Mutex<Option<ActiveRun>>,
}

impl DownloadOrchestrator {
    /// Creates an orchestrator running at most `concurrency` pages at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-5).
    ///
    /// # Example
    ///
    /// ```
    /// use exdownloader_core::download::DownloadOrchestrator;
    ///
    /// let orchestrator = DownloadOrchestrator::new(3).unwrap();
    /// assert_eq!(orchestrator.concurrency(), 3);
    /// assert!(DownloadOrchestrator::new(6).is_err());
    /// ```
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        debug!(concurrency, "creating download orchestrator");
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            wave_delay: DEFAULT_WAVE_DELAY,
            stats: Arc::new(DownloadStats::new()),
            active: Mutex::new(None),
        })
    }

    /// Sets the pause between a drained wave and the next one.
    #[must_use]
    pub fn with_wave_delay(mut self, delay: Duration) -> Self {
        self.wave_delay = delay;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the counters shared by every run.
    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Entry currently being downloaded, if any.
    #[must_use]
    pub fn active_entry(&self) -> Option<EntryId> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|run| run.entry)
    }

    /// Downloads every page of `entry` with a fresh cancellation token.
    ///
    /// # Errors
    ///
    /// See [`submit_cancellable`](Self::submit_cancellable).
    pub async fn submit(
        &self,
        queue: &GalleryQueue,
        entry: EntryId,
        fetcher: Arc<dyn PageFetcher>,
        tasks: Vec<DownloadTask>,
    ) -> Result<GalleryRun, EngineError> {
        self.submit_cancellable(queue, entry, fetcher, tasks, CancellationToken::new())
            .await
    }

    /// Downloads every page of `entry`, stopping early when `token` fires.
    ///
    /// The entry must be Downloading. Page failures are not errors of this
    /// method; they are reported through [`GalleryRun`].
    ///
    /// # Errors
    ///
    /// - [`EngineError::Busy`] if another submit is running
    /// - [`EngineError::Queue`] if the entry is unknown
    /// - [`EngineError::MissingTasks`] if remaining pages have no task
    #[instrument(skip(self, queue, fetcher, tasks, token), fields(entry = %entry, tasks = tasks.len()))]
    pub async fn submit_cancellable(
        &self,
        queue: &GalleryQueue,
        entry: EntryId,
        fetcher: Arc<dyn PageFetcher>,
        tasks: Vec<DownloadTask>,
        token: CancellationToken,
    ) -> Result<GalleryRun, EngineError> {
        let _slot = self.register(queue, entry, &token)?;
        if token.is_cancelled() {
            return Ok(GalleryRun::Cancelled);
        }

        let tasks: BTreeMap<u32, DownloadTask> =
            tasks.into_iter().map(|task| (task.page, task)).collect();
        let mut wave = 0usize;

        loop {
            let remaining = queue.remaining_pages(entry)?;
            if remaining.is_empty() {
                return Ok(self.finish(queue, entry, &token));
            }
            let pending: Vec<DownloadTask> = remaining
                .iter()
                .filter_map(|page| tasks.get(page).cloned())
                .collect();
            if pending.len() != remaining.len() {
                let pages = remaining
                    .into_iter()
                    .filter(|page| !tasks.contains_key(page))
                    .collect();
                return Err(EngineError::MissingTasks { entry, pages });
            }

            wave += 1;
            self.stats.waves.fetch_add(1, Ordering::SeqCst);
            info!(wave, pages = pending.len(), "dispatching wave");

            match self
                .run_wave(queue, entry, &fetcher, pending, &token)
                .await
            {
                WaveOutcome::Cancelled => return Ok(GalleryRun::Cancelled),
                WaveOutcome::Fatal(error) => {
                    warn!(wave, %error, "gallery halted");
                    return Ok(GalleryRun::Halted(error));
                }
                WaveOutcome::Drained => {}
            }

            let left = queue.remaining_pages(entry)?.len();
            if left == 0 {
                return Ok(self.finish(queue, entry, &token));
            }
            let delay = wave_delay(self.wave_delay);
            info!(wave, left, delay_ms = delay.as_millis(), "wave drained; retrying stragglers");
            tokio::select! {
                biased;
                () = token.cancelled() => return Ok(GalleryRun::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Cancels the running gallery.
    ///
    /// The entry is back in Waiting when this returns. In-flight tasks are
    /// detached and their results discarded; partial files stay on disk.
    /// Returns whether a run was active.
    pub fn cancel(&self) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(run) = active else {
            return false;
        };
        run.queue.reset_to_waiting(run.entry);
        run.token.cancel();
        info!(entry = %run.entry, "download cancelled");
        true
    }

    fn register(
        &self,
        queue: &GalleryQueue,
        entry: EntryId,
        token: &CancellationToken,
    ) -> Result<ActiveRunSlot<'_>, EngineError> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = slot.as_ref() {
            return Err(EngineError::Busy { active: run.entry });
        }
        if queue.status(entry).is_none() {
            return Err(QueueError::UnknownEntry(entry).into());
        }
        *slot = Some(ActiveRun {
            queue: queue.clone(),
            entry,
            token: token.clone(),
        });
        Ok(ActiveRunSlot(&self.active))
    }

    fn finish(&self, queue: &GalleryQueue, entry: EntryId, token: &CancellationToken) -> GalleryRun {
        match queue.mark_completed(entry) {
            Ok(()) => {
                info!(entry = %entry, "gallery completed");
                GalleryRun::Completed
            }
            Err(error) if token.is_cancelled() => {
                debug!(%error, "completion raced with cancellation");
                GalleryRun::Cancelled
            }
            Err(error) => {
                // Only a concurrent reset can get here; treat it like a cancel.
                warn!(%error, "entry left Downloading before completion");
                GalleryRun::Cancelled
            }
        }
    }

    async fn run_wave(
        &self,
        queue: &GalleryQueue,
        entry: EntryId,
        fetcher: &Arc<dyn PageFetcher>,
        pending: Vec<DownloadTask>,
        token: &CancellationToken,
    ) -> WaveOutcome {
        let halted = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for task in pending {
            let semaphore = Arc::clone(&self.semaphore);
            let fetcher = Arc::clone(fetcher);
            let halted = Arc::clone(&halted);
            let token = token.clone();
            let stats = Arc::clone(&self.stats);
            set.spawn(async move {
                let page = task.page;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (page, TaskReport::NotStarted);
                };
                if halted.load(Ordering::SeqCst) || token.is_cancelled() {
                    return (page, TaskReport::NotStarted);
                }
                let _active = ActiveTaskGuard::start(&stats);
                (page, TaskReport::Finished(fetcher.fetch_page(&task).await))
            });
        }

        let mut first_fatal: Option<DownloadError> = None;
        loop {
            let joined = tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(in_flight = set.len(), "detaching in-flight tasks");
                    set.detach_all();
                    return WaveOutcome::Cancelled;
                }
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let (page, report) = match joined {
                Ok(result) => result,
                Err(error) => {
                    warn!(%error, "download task panicked; page stays queued");
                    continue;
                }
            };
            match report {
                TaskReport::NotStarted => {}
                TaskReport::Finished(Ok(outcome)) => {
                    if matches!(outcome, PageOutcome::Skipped { .. }) {
                        self.stats.skipped.fetch_add(1, Ordering::SeqCst);
                    } else {
                        self.stats.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    queue.complete_page(entry, page);
                }
                TaskReport::Finished(Err(error)) => match classify_error(&error) {
                    FailureType::Transient => {
                        self.stats.transient_failures.fetch_add(1, Ordering::SeqCst);
                        warn!(page, %error, "transient failure; page kept for next wave");
                    }
                    FailureType::Fatal => {
                        self.stats.fatal_failures.fetch_add(1, Ordering::SeqCst);
                        halted.store(true, Ordering::SeqCst);
                        if first_fatal.is_none() {
                            warn!(page, %error, "fatal failure; halting gallery");
                            first_fatal = Some(error);
                        } else {
                            debug!(page, %error, "additional fatal failure suppressed");
                        }
                    }
                },
            }
        }

        match first_fatal {
            Some(error) => WaveOutcome::Fatal(error),
            None => WaveOutcome::Drained,
        }
    }
}
