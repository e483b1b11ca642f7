//! Units of work handed to the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::filename::gallery_folder_name;
use crate::site::{GalleryInfo, KeySet};

/// How pages of a gallery are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Root directory; each gallery gets its own folder inside it.
    pub output_dir: PathBuf,
    /// Name files `<page>.<ext>` instead of the name in the image URL.
    pub rename_by_index: bool,
    /// Replace files that already exist.
    pub overwrite: bool,
}

impl DownloadOptions {
    /// Folder the pages of `gallery` are written to.
    #[must_use]
    pub fn gallery_dir(&self, gallery: &GalleryInfo) -> PathBuf {
        self.output_dir.join(gallery_folder_name(gallery))
    }
}

/// One page of one gallery. Cheap to clone, so a retry wave re-creates it verbatim.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// The gallery the page belongs to.
    pub gallery: Arc<GalleryInfo>,
    /// Key material of the gallery.
    pub keys: Arc<KeySet>,
    /// Page number, starting at 1.
    pub page: u32,
    /// Directory the file is written to.
    pub destination: PathBuf,
    /// Name the file by page number.
    pub rename_by_index: bool,
    /// Replace an existing file.
    pub overwrite: bool,
}

impl DownloadTask {
    /// Directory the file is written to.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// Builds one task per page covered by `keys`.
#[must_use]
pub fn build_tasks(
    gallery: &Arc<GalleryInfo>,
    keys: &Arc<KeySet>,
    options: &DownloadOptions,
) -> Vec<DownloadTask> {
    let destination = options.gallery_dir(gallery);
    keys.pages()
        .map(|page| DownloadTask {
            gallery: Arc::clone(gallery),
            keys: Arc::clone(keys),
            page,
            destination: destination.clone(),
            rename_by_index: options.rename_by_index,
            overwrite: options.overwrite,
        })
        .collect()
}
