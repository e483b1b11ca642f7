//! Gallery Downloader Core Library
//!
//! Downloads paged image galleries: gallery metadata is fetched once, the
//! per-page keys are resolved, then pages are located and streamed to disk by
//! a bounded pool that retries stragglers in waves.
//!
//! # Architecture
//!
//! - [`site`] - protocol layer: ban detection, gallery information, key and
//!   image location resolution
//! - [`session`] - cookies, proxy settings and HTTP client construction
//! - [`download`] - per-page fetch and the wave orchestrator
//! - [`queue`] - gallery ledger and the runner that sequences it
//! - [`cache`] / [`db`] - `SQLite` cache for gallery metadata

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod db;
pub mod download;
pub mod queue;
pub mod session;
pub mod site;
pub mod user_agent;

// Re-export commonly used types
pub use cache::{CacheError, MetadataCache, SqliteMetadataCache};
pub use db::{Database, DbError};
pub use download::{
    DEFAULT_CONCURRENCY, DownloadError, DownloadOptions, DownloadOrchestrator, DownloadStats,
    EngineError, FailureType, GalleryRun, PageFetcher, classify_error,
};
pub use queue::{
    EntryId, EntryStatus, GalleryQueue, QueueEntry, QueueError, QueueEvent, QueueRunner,
    RunOutcome,
};
pub use session::{Credentials, ProxyConfig, Session};
pub use site::{
    BanCondition, GalleryCatalog, GalleryInfo, GalleryKeyResolver, ImageLocationResolver, KeySet,
    SiteClient, SiteError,
};
