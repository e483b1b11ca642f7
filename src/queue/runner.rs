//! Sequences queue entries through key resolution and page download.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{EntryId, GalleryQueue, QueueError};
use crate::download::{
    DownloadError, DownloadOptions, DownloadOrchestrator, EngineError, Filesystem, GalleryRun,
    LocalFilesystem, PageFetcher, SitePageFetcher, build_tasks,
};
use crate::session::Session;
use crate::site::{GalleryInfo, GalleryKeyResolver, SiteClient, SiteError};

/// Builds the page fetcher used for one gallery attempt.
///
/// Called once per attempt with a client built from the session's current
/// settings, so proxy changes apply to the next gallery only.
pub trait FetcherFactory: Send + Sync {
    /// Returns a fetcher bound to `client`.
    fn fetcher(&self, client: SiteClient) -> Arc<dyn PageFetcher>;
}

impl<F> FetcherFactory for F
where
    F: Fn(SiteClient) -> Arc<dyn PageFetcher> + Send + Sync,
{
    fn fetcher(&self, client: SiteClient) -> Arc<dyn PageFetcher> {
        self(client)
    }
}

/// Creates [`SitePageFetcher`]s writing through `fs`.
#[derive(Clone)]
pub struct SiteFetcherFactory {
    fs: Arc<dyn Filesystem>,
}

impl SiteFetcherFactory {
    /// Factory writing through the given filesystem.
    #[must_use]
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs }
    }
}

impl Default for SiteFetcherFactory {
    fn default() -> Self {
        Self::new(Arc::new(LocalFilesystem))
    }
}

impl FetcherFactory for SiteFetcherFactory {
    fn fetcher(&self, client: SiteClient) -> Arc<dyn PageFetcher> {
        Arc::new(SitePageFetcher::new(client, Arc::clone(&self.fs)))
    }
}

/// Why a gallery attempt stopped.
#[derive(Debug, Error)]
pub enum RunError {
    /// Key resolution failed; the entry is back in Waiting.
    #[error("key resolution failed: {0}")]
    Resolution(#[source] SiteError),

    /// A fatal page error; the entry stays Downloading.
    #[error("download halted: {0}")]
    Download(#[source] DownloadError),

    /// The orchestrator refused the gallery.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The ledger refused a transition.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl RunError {
    /// The ban condition behind this error, if any.
    #[must_use]
    pub fn ban_condition(&self) -> Option<crate::site::BanCondition> {
        match self {
            Self::Resolution(error) | Self::Download(DownloadError::Site(error)) => {
                error.ban_condition()
            }
            _ => None,
        }
    }
}

/// Result of one [`QueueRunner::run_next`] call.
#[derive(Debug)]
pub enum RunOutcome {
    /// No Waiting entry.
    Idle,
    /// The entry finished every page.
    Completed(EntryId),
    /// The attempt was cancelled; the entry is Waiting.
    Cancelled(EntryId),
    /// The attempt stopped on a fatal condition.
    Halted {
        /// The entry.
        entry: EntryId,
        /// The condition, reported once.
        error: RunError,
    },
    /// An entry is still active (usually halted) and blocks the queue.
    Blocked(EntryId),
}

impl RunOutcome {
    /// Whether the outcome needs user attention.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Halted { .. } | Self::Blocked(_))
    }
}

/// Summary of [`QueueRunner::run_until_idle`].
#[derive(Debug)]
pub struct RunReport {
    /// Entries completed during the run, in order.
    pub completed: Vec<EntryId>,
    /// The outcome that ended the run.
    pub outcome: RunOutcome,
}

/// Drives Waiting entries one at a time.
pub struct QueueRunner {
    queue: GalleryQueue,
    session: Arc<Session>,
    resolver: GalleryKeyResolver,
    orchestrator: Arc<DownloadOrchestrator>,
    fetchers: Arc<dyn FetcherFactory>,
    options: DownloadOptions,
    attempt: Mutex<Option<(EntryId, CancellationToken)>>,
}

impl std::fmt::Debug for QueueRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRunner")
            .field("queue", &self.queue)
            .field("orchestrator", &self.orchestrator)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Clears the attempt slot when `run_next` returns.
struct AttemptSlot<'a>(&'a Mutex<Option<(EntryId, CancellationToken)>>);

impl Drop for AttemptSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl QueueRunner {
    /// Creates a runner writing pages to the local filesystem.
    #[must_use]
    pub fn new(
        queue: GalleryQueue,
        session: Arc<Session>,
        orchestrator: Arc<DownloadOrchestrator>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            queue,
            session,
            resolver: GalleryKeyResolver::new(),
            orchestrator,
            fetchers: Arc::new(SiteFetcherFactory::default()),
            options,
            attempt: Mutex::new(None),
        }
    }

    /// Replaces how page fetchers are built.
    #[must_use]
    pub fn with_fetchers(mut self, fetchers: Arc<dyn FetcherFactory>) -> Self {
        self.fetchers = fetchers;
        self
    }

    /// Replaces the key resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: GalleryKeyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// The ledger this runner drives.
    #[must_use]
    pub fn queue(&self) -> &GalleryQueue {
        &self.queue
    }

    /// The orchestrator used for page downloads.
    #[must_use]
    pub fn orchestrator(&self) -> &DownloadOrchestrator {
        &self.orchestrator
    }

    /// Processes the first Waiting entry.
    #[instrument(skip(self))]
    pub async fn run_next(&self) -> RunOutcome {
        if let Some(active) = self.queue.active() {
            return RunOutcome::Blocked(active);
        }
        let Some(entry) = self.queue.next_waiting() else {
            return RunOutcome::Idle;
        };

        let (gallery, token, _slot) = match self.start_attempt(entry) {
            Ok(started) => started,
            Err(QueueError::Busy { active }) => return RunOutcome::Blocked(active),
            Err(error) => {
                return RunOutcome::Halted {
                    entry,
                    error: error.into(),
                };
            }
        };
        info!(entry = %entry, gallery_id = gallery.id, title = %gallery.display_name, "preparing gallery");

        let client = match self.session.connect() {
            Ok(client) => client,
            Err(error) => return self.resolution_failed(entry, error, &token),
        };
        let resolved = tokio::select! {
            biased;
            () = token.cancelled() => return RunOutcome::Cancelled(entry),
            resolved = self.resolver.resolve(&client, &gallery) => resolved,
        };
        let keys = match resolved {
            Ok(keys) => Arc::new(keys),
            Err(error) => return self.resolution_failed(entry, error, &token),
        };

        if let Err(error) = self.queue.begin_downloading(entry) {
            if token.is_cancelled() {
                return RunOutcome::Cancelled(entry);
            }
            return RunOutcome::Halted {
                entry,
                error: error.into(),
            };
        }

        let tasks = build_tasks(&gallery, &keys, &self.options);
        let fetcher = self.fetchers.fetcher(client);
        let run = self
            .orchestrator
            .submit_cancellable(&self.queue, entry, fetcher, tasks, token.clone())
            .await;
        match run {
            Ok(GalleryRun::Completed) => RunOutcome::Completed(entry),
            Ok(GalleryRun::Cancelled) => RunOutcome::Cancelled(entry),
            Ok(GalleryRun::Halted(error)) => self.halted(entry, RunError::Download(error)),
            Err(error) => self.halted(entry, error.into()),
        }
    }

    /// Runs entries until the queue is idle or an attempt does not complete.
    pub async fn run_until_idle(&self) -> RunReport {
        let mut completed = Vec::new();
        loop {
            match self.run_next().await {
                RunOutcome::Completed(entry) => completed.push(entry),
                outcome => return RunReport { completed, outcome },
            }
        }
    }

    /// Cancels the current attempt, whichever phase it is in.
    ///
    /// An entry left Downloading by a fatal halt is released as well. The
    /// entry is Waiting when this returns. Returns whether anything was
    /// cancelled.
    pub fn cancel(&self) -> bool {
        let attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        let cancelled = match &*attempt {
            Some((entry, token)) => {
                self.queue.reset_to_waiting(*entry);
                token.cancel();
                info!(entry = %entry, "gallery attempt cancelled");
                true
            }
            None => self.queue.active().is_some_and(|entry| {
                let released = self.queue.reset_to_waiting(entry);
                if released {
                    info!(entry = %entry, "halted gallery returned to the queue");
                }
                released
            }),
        };
        drop(attempt);
        self.orchestrator.cancel() || cancelled
    }

    /// Moves `entry` to Preparing and publishes its token in one step, so a
    /// concurrent [`cancel`](Self::cancel) sees either neither or both.
    fn start_attempt(
        &self,
        entry: EntryId,
    ) -> Result<(Arc<GalleryInfo>, CancellationToken, AttemptSlot<'_>), QueueError> {
        let mut attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        let gallery = self.queue.begin_preparing(entry)?;
        let token = CancellationToken::new();
        *attempt = Some((entry, token.clone()));
        drop(attempt);
        Ok((gallery, token, AttemptSlot(&self.attempt)))
    }

    fn resolution_failed(
        &self,
        entry: EntryId,
        error: SiteError,
        token: &CancellationToken,
    ) -> RunOutcome {
        if token.is_cancelled() {
            return RunOutcome::Cancelled(entry);
        }
        self.queue.reset_to_waiting(entry);
        self.halted(entry, RunError::Resolution(error))
    }

    fn halted(&self, entry: EntryId, error: RunError) -> RunOutcome {
        warn!(entry = %entry, %error, "gallery attempt halted");
        self.queue.publish_halted(entry, error.to_string());
        RunOutcome::Halted { entry, error }
    }
}
