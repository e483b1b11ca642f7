//! Orchestrator behaviour with scripted page fetchers: wave retries, fatal
//! halts, the concurrency bound and cancellation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use exdownloader_core::download::{
    DownloadError, DownloadOptions, DownloadOrchestrator, DownloadTask, EngineError, GalleryRun,
    PageFetcher, PageOutcome, build_tasks,
};
use exdownloader_core::queue::{EntryId, EntryStatus, GalleryQueue};
use exdownloader_core::site::{GalleryInfo, KeySet, SiteError};
use url::Url;

#[derive(Debug, Clone, Copy)]
enum Failure {
    /// Real connection error from a closed local port.
    Reset,
    Quota,
}

/// Fetcher that fails scripted attempts and records what it saw.
#[derive(Default)]
struct ScriptedFetcher {
    /// page -> failures to return before succeeding (or forever, for Quota)
    script: HashMap<u32, (Failure, usize)>,
    delay: Duration,
    attempts: Mutex<BTreeMap<u32, usize>>,
    writes: Mutex<Vec<u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedFetcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn fail(mut self, page: u32, failure: Failure, times: usize) -> Self {
        self.script.insert(page, (failure, times));
        self
    }

    fn attempts(&self, page: u32) -> usize {
        self.attempts.lock().unwrap().get(&page).copied().unwrap_or(0)
    }

    fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().values().sum()
    }

    fn writes(&self) -> Vec<u32> {
        self.writes.lock().unwrap().clone()
    }
}

async fn connection_error() -> DownloadError {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{port}/img.jpg");
    let source = reqwest::Client::new().get(&url).send().await.unwrap_err();
    DownloadError::from(SiteError::from_reqwest(url, source))
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, task: &DownloadTask) -> Result<PageOutcome, DownloadError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(task.page).or_insert(0);
            *count += 1;
            *count
        };
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.script.get(&task.page) {
            Some((Failure::Quota, _)) => {
                Err(SiteError::QuotaExhausted { page: task.page }.into())
            }
            Some((Failure::Reset, times)) if attempt <= *times => Err(connection_error().await),
            _ => {
                self.writes.lock().unwrap().push(task.page);
                Ok(PageOutcome::Saved {
                    path: task.destination().join(format!("{}.jpg", task.page)),
                    bytes: 1,
                })
            }
        }
    }
}

fn gallery(pages: u32) -> Arc<GalleryInfo> {
    Arc::new(GalleryInfo {
        address: Url::parse("https://site.example/g/7/abcdef0123/").unwrap(),
        id: 7,
        display_name: "Scripted".to_string(),
        size_label: String::new(),
        page_count: pages,
        thumbnail_url: None,
    })
}

/// Queue with one entry already in Downloading, plus its tasks.
fn downloading_entry(pages: u32) -> (GalleryQueue, EntryId, Vec<DownloadTask>) {
    let gallery = gallery(pages);
    let queue = GalleryQueue::new();
    let entry = queue.enqueue(Arc::clone(&gallery));
    queue.begin_preparing(entry).unwrap();
    queue.begin_downloading(entry).unwrap();

    let image_keys = (1..=pages).map(|p| (p, format!("{p:010x}"))).collect();
    let keys = Arc::new(KeySet::from_parts(image_keys, "showkey0001", pages).unwrap());
    let options = DownloadOptions {
        output_dir: PathBuf::from("/unused"),
        ..DownloadOptions::default()
    };
    let tasks = build_tasks(&gallery, &keys, &options);
    (queue, entry, tasks)
}

fn orchestrator(concurrency: usize) -> DownloadOrchestrator {
    DownloadOrchestrator::new(concurrency)
        .unwrap()
        .with_wave_delay(Duration::ZERO)
}

#[tokio::test]
async fn test_page_42_failing_twice_still_completes_85_pages() {
    let (queue, entry, tasks) = downloading_entry(85);
    let fetcher = Arc::new(
        ScriptedFetcher::with_delay(Duration::from_millis(1)).fail(42, Failure::Reset, 2),
    );
    let orchestrator = orchestrator(3);

    let run = orchestrator
        .submit(&queue, entry, fetcher.clone(), tasks)
        .await
        .unwrap();

    assert!(matches!(run, GalleryRun::Completed), "{run:?}");
    assert_eq!(queue.status(entry), Some(EntryStatus::Completed));
    assert!(queue.remaining_pages(entry).unwrap().is_empty());

    let writes = fetcher.writes();
    assert_eq!(writes.len(), 85);
    assert_eq!(writes.iter().collect::<BTreeSet<_>>().len(), 85);
    assert_eq!(fetcher.attempts(42), 3);
    assert_eq!(fetcher.attempts(41), 1);
    assert_eq!(orchestrator.stats().waves(), 3);
    assert_eq!(orchestrator.stats().transient_failures(), 2);
    assert_eq!(orchestrator.stats().completed(), 85);
}

#[tokio::test]
async fn test_quota_on_page_5_halts_and_leaves_entry_downloading() {
    let (queue, entry, tasks) = downloading_entry(20);
    let fetcher = Arc::new(
        ScriptedFetcher::with_delay(Duration::from_millis(2)).fail(5, Failure::Quota, 0),
    );

    let run = orchestrator(1)
        .submit(&queue, entry, fetcher.clone(), tasks)
        .await
        .unwrap();

    match run {
        GalleryRun::Halted(DownloadError::Site(SiteError::QuotaExhausted { page })) => {
            assert_eq!(page, 5);
        }
        other => panic!("expected quota halt, got {other:?}"),
    }
    assert_eq!(queue.status(entry), Some(EntryStatus::Downloading));
    assert!(queue.remaining_pages(entry).unwrap().contains(&5));
    assert!(fetcher.total_attempts() < 20, "pending pages should be discarded");
    assert_eq!(fetcher.attempts(5), 1);

    queue.requeue(entry).unwrap();
    assert_eq!(queue.status(entry), Some(EntryStatus::Waiting));
}

#[tokio::test]
async fn test_concurrent_fatal_failures_report_one_error() {
    let (queue, entry, tasks) = downloading_entry(6);
    let mut fetcher = ScriptedFetcher::with_delay(Duration::from_millis(5));
    for page in 1..=6 {
        fetcher = fetcher.fail(page, Failure::Quota, 0);
    }
    let orchestrator = orchestrator(3);

    let run = orchestrator
        .submit(&queue, entry, Arc::new(fetcher), tasks)
        .await
        .unwrap();

    assert!(matches!(run, GalleryRun::Halted(_)));
    assert!(orchestrator.stats().fatal_failures() >= 1);
    assert_eq!(orchestrator.stats().waves(), 1);
}

#[tokio::test]
async fn test_never_exceeds_concurrency_limit() {
    for concurrency in [1, 2, 5] {
        let (queue, entry, tasks) = downloading_entry(30);
        let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(3)));
        let orchestrator = orchestrator(concurrency);

        let run = orchestrator
            .submit(&queue, entry, fetcher.clone(), tasks)
            .await
            .unwrap();

        assert!(matches!(run, GalleryRun::Completed));
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak <= concurrency, "peak {peak} > {concurrency}");
        assert!(orchestrator.stats().peak_active() <= concurrency);
        assert_eq!(fetcher.writes().len(), 30);
    }
}

#[tokio::test]
async fn test_cancel_returns_entry_to_waiting_immediately() {
    let (queue, entry, tasks) = downloading_entry(10);
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_secs(30)));
    let orchestrator = Arc::new(orchestrator(3));

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let queue = queue.clone();
        let fetcher = fetcher.clone();
        tokio::spawn(async move { orchestrator.submit(&queue, entry, fetcher, tasks).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.stats().active() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(orchestrator.cancel());
    assert_eq!(queue.status(entry), Some(EntryStatus::Waiting));

    let run = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(run, GalleryRun::Cancelled));
    assert_eq!(queue.status(entry), Some(EntryStatus::Waiting));
    assert_eq!(queue.remaining_pages(entry).unwrap().len(), 10);
    assert!(fetcher.writes().is_empty());
    assert_eq!(orchestrator.active_entry(), None);
}

#[tokio::test]
async fn test_cancelled_token_before_submit_does_nothing() {
    let (queue, entry, tasks) = downloading_entry(3);
    let fetcher = Arc::new(ScriptedFetcher::default());
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();

    let run = orchestrator(2)
        .submit_cancellable(&queue, entry, fetcher.clone(), tasks, token)
        .await
        .unwrap();

    assert!(matches!(run, GalleryRun::Cancelled));
    assert_eq!(fetcher.total_attempts(), 0);
}

#[tokio::test]
async fn test_missing_tasks_rejected() {
    let (queue, entry, mut tasks) = downloading_entry(4);
    tasks.retain(|task| task.page != 3);

    let err = orchestrator(2)
        .submit(&queue, entry, Arc::new(ScriptedFetcher::default()), tasks)
        .await
        .unwrap_err();
    match err {
        EngineError::MissingTasks { pages, .. } => assert_eq!(pages, vec![3]),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_second_submit_while_running_is_busy() {
    let (queue, entry, tasks) = downloading_entry(2);
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_secs(30)));
    let orchestrator = Arc::new(orchestrator(1));

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let queue = queue.clone();
        let fetcher = fetcher.clone();
        let tasks = tasks.clone();
        tokio::spawn(async move { orchestrator.submit(&queue, entry, fetcher, tasks).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.active_entry().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = orchestrator
        .submit(&queue, entry, fetcher, tasks)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Busy { .. }));

    orchestrator.cancel();
    let run = handle.await.unwrap().unwrap();
    assert!(matches!(run, GalleryRun::Cancelled));
}
