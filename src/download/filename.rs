//! File and folder naming for downloaded pages.

use std::path::{Component, Path};

use tracing::debug;
use url::Url;

use crate::site::GalleryInfo;

/// Suffix of a download still in progress.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Sanitizes a name for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Folder name for a gallery: its title, or the id when the title is unusable.
#[must_use]
pub fn gallery_folder_name(gallery: &GalleryInfo) -> String {
    let name = sanitize_filename(&gallery.display_name);
    if name.trim_matches('_').is_empty() {
        gallery.id.to_string()
    } else {
        name
    }
}

/// File name carried by the resolved image URL.
///
/// Uses the last path segment, percent-decoded and sanitized.
#[must_use]
pub fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(
        |e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.to_string()
        },
        std::borrow::Cow::into_owned,
    );
    Some(sanitize_filename(&decoded))
}

/// Extension (with the dot) of the image behind `url`, defaulting to `.jpg`.
#[must_use]
pub fn extension_from_url(url: &Url) -> String {
    filename_from_url(url)
        .and_then(|name| {
            let (_, ext) = name.rsplit_once('.')?;
            let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
            valid.then(|| format!(".{}", ext.to_ascii_lowercase()))
        })
        .unwrap_or_else(|| ".jpg".to_string())
}

/// File name used when renaming by page index.
#[must_use]
pub fn indexed_filename(page: u32, extension: &str) -> String {
    format!("{page}{extension}")
}

/// Whether `name` is a finished page file for `page` (`<page>.<ext>`).
#[must_use]
pub fn is_indexed_file_for(name: &str, page: u32) -> bool {
    if name.ends_with(PARTIAL_SUFFIX) {
        return false;
    }
    name.split_once('.')
        .is_some_and(|(stem, ext)| !ext.is_empty() && stem.parse::<u32>().ok() == Some(page))
}

/// Name of the in-progress file for `name` written by `attempt`.
#[must_use]
pub fn partial_name(name: &str, attempt: u32) -> String {
    format!("{name}.{attempt:08x}{PARTIAL_SUFFIX}")
}
