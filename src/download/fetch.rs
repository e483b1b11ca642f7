//! Per-page lifecycle: locate the image, then stream it to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Response;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::error::DownloadError;
use super::filename::{
    extension_from_url, filename_from_url, indexed_filename, is_indexed_file_for, partial_name,
    sanitize_filename,
};
use super::fs::Filesystem;
use super::task::DownloadTask;
use crate::site::{GalleryInfo, ImageLocationResolver, SiteClient, SiteError};

/// Result of a successful page task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The image was written to `path`.
    Saved {
        /// Final file path.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// The file already existed and overwrite was not requested.
    Skipped {
        /// The existing file.
        path: PathBuf,
    },
}

/// Executes one page task. Implementations only report; they never decide
/// whether the gallery stops.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Downloads the page described by `task`.
    async fn fetch_page(&self, task: &DownloadTask) -> Result<PageOutcome, DownloadError>;
}

/// [`PageFetcher`] talking to the gallery site.
#[derive(Clone)]
pub struct SitePageFetcher {
    client: SiteClient,
    locator: ImageLocationResolver,
    fs: Arc<dyn Filesystem>,
    attempt: u32,
}

impl std::fmt::Debug for SitePageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitePageFetcher")
            .field("client", &self.client)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl SitePageFetcher {
    /// Creates a fetcher using `client` for every page.
    ///
    /// Each fetcher tags its partial files with its own attempt number, so
    /// tasks left over from a cancelled attempt never touch the files of a
    /// later one.
    #[must_use]
    pub fn new(client: SiteClient, fs: Arc<dyn Filesystem>) -> Self {
        Self {
            client,
            locator: ImageLocationResolver::new(),
            fs,
            attempt: rand::random(),
        }
    }

    async fn existing_indexed_file(&self, task: &DownloadTask) -> Result<Option<PathBuf>, DownloadError> {
        let names = self
            .fs
            .list_dir(task.destination())
            .await
            .map_err(|e| DownloadError::io(task.destination(), e))?;
        Ok(names
            .into_iter()
            .find(|name| is_indexed_file_for(name, task.page))
            .map(|name| task.destination().join(name)))
    }
}

#[async_trait]
impl PageFetcher for SitePageFetcher {
    #[instrument(skip(self, task), fields(gallery_id = task.gallery.id, page = task.page))]
    async fn fetch_page(&self, task: &DownloadTask) -> Result<PageOutcome, DownloadError> {
        if task.keys.image_key(task.page).is_none() {
            return Err(DownloadError::UnknownPage { page: task.page });
        }
        self.fs
            .create_dir_all(task.destination())
            .await
            .map_err(|e| DownloadError::io(task.destination(), e))?;

        // With index names the target is known before any request.
        if task.rename_by_index
            && !task.overwrite
            && let Some(path) = self.existing_indexed_file(task).await?
        {
            debug!(path = %path.display(), "page already on disk");
            return Ok(PageOutcome::Skipped { path });
        }

        let location = self
            .locator
            .locate(&self.client, &task.gallery, &task.keys, task.page)
            .await?;

        let name = if task.rename_by_index {
            indexed_filename(task.page, &extension_from_url(&location.url))
        } else {
            filename_from_url(&location.url)
                .unwrap_or_else(|| indexed_filename(task.page, &extension_from_url(&location.url)))
        };
        let path = task.destination().join(&name);

        if !task.overwrite
            && self
                .fs
                .exists(&path)
                .await
                .map_err(|e| DownloadError::io(&path, e))?
        {
            debug!(path = %path.display(), "page already on disk");
            return Ok(PageOutcome::Skipped { path });
        }

        let bytes = write_response(
            self.fs.as_ref(),
            location.response,
            task.destination(),
            &name,
            self.attempt,
        )
        .await?;
        info!(path = %path.display(), bytes, "page saved");
        Ok(PageOutcome::Saved { path, bytes })
    }
}

/// Streams `response` into `dir/name` through a `.part` file tagged with
/// `attempt`.
///
/// The partial file is removed again when the body cannot be completed. The
/// final name only appears once the whole body has been written and flushed.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] for filesystem failures,
/// [`DownloadError::Truncated`] when the body is shorter than its
/// `Content-Length`, and stream transport errors.
pub async fn write_response(
    fs: &dyn Filesystem,
    response: Response,
    dir: &Path,
    name: &str,
    attempt: u32,
) -> Result<u64, DownloadError> {
    let part = dir.join(partial_name(name, attempt));
    let path = dir.join(name);

    let bytes_written = match stream_to_partial(fs, response, &part).await {
        Ok(bytes) => bytes,
        Err(error) => {
            if let Err(cleanup) = fs.remove_file(&part).await {
                debug!(path = %part.display(), error = %cleanup, "partial file left behind");
            }
            return Err(error);
        }
    };

    fs.remove_file(&path)
        .await
        .map_err(|e| DownloadError::io(&path, e))?;
    fs.rename(&part, &path)
        .await
        .map_err(|e| DownloadError::io(&path, e))?;
    Ok(bytes_written)
}

async fn stream_to_partial(
    fs: &dyn Filesystem,
    response: Response,
    part: &Path,
) -> Result<u64, DownloadError> {
    let url = response.url().to_string();
    let expected = response.content_length();

    fs.remove_file(part)
        .await
        .map_err(|e| DownloadError::io(part, e))?;
    let file = fs
        .open_for_append(part)
        .await
        .map_err(|e| DownloadError::io(part, e))?;

    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::stream(&url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(part, e))?;
        bytes_written += chunk.len() as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(part, e))?;
    drop(writer);

    if let Some(expected) = expected
        && expected != bytes_written
    {
        return Err(DownloadError::truncated(url, expected, bytes_written));
    }
    Ok(bytes_written)
}

/// Downloads the gallery cover into `dir`, returning its path.
///
/// # Errors
///
/// Returns [`DownloadError::Site`] when the gallery has no thumbnail or the
/// request fails, and write errors as in [`write_response`].
#[instrument(skip(client, fs, gallery), fields(gallery_id = gallery.id))]
pub async fn fetch_thumbnail(
    client: &SiteClient,
    fs: &dyn Filesystem,
    gallery: &GalleryInfo,
    dir: &Path,
) -> Result<PathBuf, DownloadError> {
    let raw = gallery
        .thumbnail_url
        .as_deref()
        .ok_or_else(|| SiteError::protocol("gallery page", "no thumbnail"))?;
    let url = Url::parse(raw)
        .or_else(|_| gallery.address.join(raw))
        .map_err(|e| SiteError::protocol("gallery page", format!("bad thumbnail URL {raw}: {e}")))?;

    fs.create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::io(dir, e))?;
    let response = client.open_stream(&url).await?;
    let name = sanitize_filename(&format!("cover{}", extension_from_url(&url)));
    write_response(fs, response, dir, &name, rand::random()).await?;
    Ok(dir.join(name))
}
