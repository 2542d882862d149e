//! Durable image catalog seam.
//!
//! The catalog is the source of truth for image metadata and bytes. The
//! metadata cache fronts [`ImageCatalog::get`]; nothing here knows about it.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use lightbox_core::{ImageId, ImageRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Catalog operation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Durable store of image records and their bytes.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Insert a new image. Fails if the id is already taken.
    async fn insert(&self, record: ImageRecord, data: Bytes) -> CatalogResult<()>;

    /// Fetch an image record.
    async fn get(&self, id: &ImageId) -> CatalogResult<Option<ImageRecord>>;

    /// Fetch an image's bytes.
    async fn read_file(&self, id: &ImageId) -> CatalogResult<Option<Bytes>>;

    /// Delete an image. Returns `false` if it did not exist.
    async fn delete(&self, id: &ImageId) -> CatalogResult<bool>;

    /// Check the catalog is reachable.
    async fn health_check(&self) -> CatalogResult<()>;
}

/// In-process catalog.
#[derive(Debug)]
pub struct MemoryCatalog {
    images: DashMap<ImageId, (ImageRecord, Bytes)>,
    available: AtomicBool,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            images: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the catalog going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn ensure_available(&self) -> CatalogResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CatalogError::Unavailable("memory catalog is offline".to_string()))
        }
    }
}

#[async_trait]
impl ImageCatalog for MemoryCatalog {
    async fn insert(&self, record: ImageRecord, data: Bytes) -> CatalogResult<()> {
        self.ensure_available()?;
        match self.images.entry(record.metadata.id) {
            Entry::Occupied(_) => Err(CatalogError::AlreadyExists(format!(
                "image {}",
                record.metadata.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert((record, data));
                Ok(())
            }
        }
    }

    async fn get(&self, id: &ImageId) -> CatalogResult<Option<ImageRecord>> {
        self.ensure_available()?;
        Ok(self.images.get(id).map(|entry| entry.0.clone()))
    }

    async fn read_file(&self, id: &ImageId) -> CatalogResult<Option<Bytes>> {
        self.ensure_available()?;
        Ok(self.images.get(id).map(|entry| entry.1.clone()))
    }

    async fn delete(&self, id: &ImageId) -> CatalogResult<bool> {
        self.ensure_available()?;
        Ok(self.images.remove(id).is_some())
    }

    async fn health_check(&self) -> CatalogResult<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightbox_core::ImageMetadata;
    use time::OffsetDateTime;

    fn record() -> ImageRecord {
        ImageRecord {
            metadata: ImageMetadata {
                id: ImageId::new(),
                filename: "a.png".to_string(),
                content_type: "image/png".to_string(),
                file_size: 3,
                width: None,
                height: None,
                created_at: OffsetDateTime::now_utc(),
            },
            upload_ip: "127.0.0.1".to_string(),
            delete_token_hash: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let catalog = MemoryCatalog::new();
        let record = record();
        let id = record.metadata.id;

        catalog
            .insert(record.clone(), Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(catalog.get(&id).await.unwrap(), Some(record.clone()));
        assert_eq!(
            catalog.read_file(&id).await.unwrap(),
            Some(Bytes::from_static(b"abc"))
        );
        assert!(matches!(
            catalog.insert(record, Bytes::new()).await,
            Err(CatalogError::AlreadyExists(_))
        ));

        assert!(catalog.delete(&id).await.unwrap());
        assert!(!catalog.delete(&id).await.unwrap());
        assert_eq!(catalog.get(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_catalog_errors() {
        let catalog = MemoryCatalog::new();
        catalog.set_available(false);
        assert!(catalog.health_check().await.is_err());
        assert!(catalog.get(&ImageId::new()).await.is_err());
    }
}
