//! Local gallery metadata cache.
//!
//! Consulted before fetching a gallery's front page; never used for page
//! downloads, which always hit the network.

use async_trait::async_trait;
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::db::{Database, DbError};
use crate::site::GalleryInfo;

/// Errors from the metadata cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying database failure.
    #[error(transparent)]
    Database(#[from] DbError),

    /// A stored row could not be turned back into a [`GalleryInfo`].
    #[error("corrupt cache row for gallery {gallery_id}: {reason}")]
    CorruptRow {
        /// Gallery id of the offending row.
        gallery_id: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// Gallery id does not fit the storage column.
    #[error("gallery id {0} out of range for the cache")]
    IdOutOfRange(u64),
}

impl From<sqlx::Error> for CacheError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(DbError::Connection(error))
    }
}

/// Lookup-by-id and bulk insert of gallery information.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Returns the cached gallery with `gallery_id`, if any.
    async fn lookup(&self, gallery_id: u64) -> Result<Option<GalleryInfo>, CacheError>;

    /// Inserts or replaces `galleries`.
    async fn bulk_insert(&self, galleries: &[GalleryInfo]) -> Result<(), CacheError>;
}

#[derive(Debug, FromRow)]
struct GalleryRow {
    gallery_id: i64,
    address: String,
    display_name: String,
    size_label: String,
    page_count: i64,
    thumbnail_url: Option<String>,
}

impl TryFrom<GalleryRow> for GalleryInfo {
    type Error = CacheError;

    fn try_from(row: GalleryRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| CacheError::CorruptRow {
            gallery_id: row.gallery_id,
            reason,
        };
        let address = Url::parse(&row.address).map_err(|e| corrupt(format!("address: {e}")))?;
        let id = u64::try_from(row.gallery_id).map_err(|e| corrupt(format!("id: {e}")))?;
        let page_count =
            u32::try_from(row.page_count).map_err(|e| corrupt(format!("page_count: {e}")))?;
        Ok(Self {
            address,
            id,
            display_name: row.display_name,
            size_label: row.size_label,
            page_count,
            thumbnail_url: row.thumbnail_url,
        })
    }
}

/// [`MetadataCache`] stored in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteMetadataCache {
    db: Database,
}

impl SqliteMetadataCache {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number of cached galleries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the query fails.
    pub async fn count(&self) -> Result<u64, CacheError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM galleries")
            .fetch_one(self.db.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl MetadataCache for SqliteMetadataCache {
    #[instrument(level = "debug", skip(self))]
    async fn lookup(&self, gallery_id: u64) -> Result<Option<GalleryInfo>, CacheError> {
        let id = i64::try_from(gallery_id).map_err(|_| CacheError::IdOutOfRange(gallery_id))?;
        let row: Option<GalleryRow> = sqlx::query_as(
            "SELECT gallery_id, address, display_name, size_label, page_count, thumbnail_url \
             FROM galleries WHERE gallery_id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(GalleryInfo::try_from).transpose()
    }

    #[instrument(level = "debug", skip(self, galleries), fields(count = galleries.len()))]
    async fn bulk_insert(&self, galleries: &[GalleryInfo]) -> Result<(), CacheError> {
        let mut tx = self.db.pool().begin().await?;
        for gallery in galleries {
            let id = i64::try_from(gallery.id).map_err(|_| CacheError::IdOutOfRange(gallery.id))?;
            sqlx::query(
                "INSERT OR REPLACE INTO galleries \
                 (gallery_id, address, display_name, size_label, page_count, thumbnail_url) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(gallery.address.as_str())
            .bind(&gallery.display_name)
            .bind(&gallery.size_label)
            .bind(i64::from(gallery.page_count))
            .bind(gallery.thumbnail_url.as_deref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = galleries.len(), "galleries cached");
        Ok(())
    }
}
