//! Page downloads: per-page fetch, failure classification, and the wave
//! orchestrator that drives a gallery to completion.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exdownloader_core::download::{
//!     DownloadOptions, DownloadOrchestrator, GalleryRun, LocalFilesystem, SitePageFetcher,
//!     build_tasks,
//! };
//! # use exdownloader_core::queue::{EntryId, GalleryQueue};
//! # use exdownloader_core::site::{GalleryInfo, KeySet, SiteClient};
//!
//! # async fn example(queue: GalleryQueue, entry: EntryId, client: SiteClient, gallery: Arc<GalleryInfo>, keys: Arc<KeySet>) -> Result<(), Box<dyn std::error::Error>> {
//! let options = DownloadOptions { output_dir: "downloads".into(), ..DownloadOptions::default() };
//! let tasks = build_tasks(&gallery, &keys, &options);
//! let fetcher = Arc::new(SitePageFetcher::new(client, Arc::new(LocalFilesystem)));
//! match DownloadOrchestrator::new(3)?.submit(&queue, entry, fetcher, tasks).await? {
//!     GalleryRun::Completed => println!("done"),
//!     GalleryRun::Halted(error) => eprintln!("halted: {error}"),
//!     GalleryRun::Cancelled => {}
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
pub mod filename;
mod fs;
mod orchestrator;
mod retry;
mod task;

pub use error::DownloadError;
pub use fetch::{PageFetcher, PageOutcome, SitePageFetcher, fetch_thumbnail, write_response};
pub use fs::{FileWriter, Filesystem, LocalFilesystem};
pub use orchestrator::{
    DEFAULT_CONCURRENCY, DownloadOrchestrator, DownloadStats, EngineError, GalleryRun,
    MAX_CONCURRENCY, MIN_CONCURRENCY,
};
pub use retry::{
    DEFAULT_WAVE_DELAY, FailureType, classify_error, classify_site_error, classify_status,
    wave_delay,
};
pub use task::{DownloadOptions, DownloadTask, build_tasks};
