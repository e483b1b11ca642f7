//! Filesystem access used by the page writer.
//!
//! Every error coming out of this layer is fatal for the gallery: a missing
//! directory or a permission problem will not fix itself on the next wave.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

/// Writable handle returned by [`Filesystem::open_for_append`].
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Filesystem operations needed to store pages.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Whether `path` exists.
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Creates `path` and all missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Opens `path` for appending, creating it when missing.
    async fn open_for_append(&self, path: &Path) -> io::Result<FileWriter>;

    /// Removes a file; a missing file is not an error.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Moves `from` to `to`, replacing `to`.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// File names directly inside `path`.
    async fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;
}

/// [`Filesystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

#[async_trait]
impl Filesystem for LocalFilesystem {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn open_for_append(&self, path: &Path) -> io::Result<FileWriter> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Box::new(file))
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_append_then_rename_and_list() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem;
        let nested = dir.path().join("gallery");
        fs.create_dir_all(&nested).await.unwrap();

        let part = nested.join("1.jpg.part");
        let mut writer = fs.open_for_append(&part).await.unwrap();
        writer.write_all(b"abc").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);
        let mut writer = fs.open_for_append(&part).await.unwrap();
        writer.write_all(b"def").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let done = nested.join("1.jpg");
        fs.rename(&part, &done).await.unwrap();
        assert!(fs.exists(&done).await.unwrap());
        assert!(!fs.exists(&part).await.unwrap());
        assert_eq!(std::fs::read(&done).unwrap(), b"abcdef");
        assert_eq!(fs.list_dir(&nested).await.unwrap(), vec!["1.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        LocalFilesystem
            .remove_file(&dir.path().join("missing"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = LocalFilesystem
            .list_dir(&dir.path().join("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
