//! Test fixtures: minimal image payloads and an instrumented catalog.

use async_trait::async_trait;
use bytes::Bytes;
use lightbox_core::{ImageId, ImageRecord};
use lightbox_server::catalog::{CatalogResult, ImageCatalog, MemoryCatalog};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A PNG header (signature + IHDR) with the given dimensions.
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[8, 6, 0, 0, 0]);
    // Padding so payloads are not trivially small.
    data.extend_from_slice(&[0u8; 64]);
    data
}

/// A JPEG with an APP0 segment followed by SOF0 carrying the dimensions.
#[allow(dead_code)]
pub fn jpeg_bytes(width: u16, height: u16) -> Vec<u8> {
    let mut data = vec![0xff, 0xd8];
    data.extend_from_slice(&[0xff, 0xe0, 0x00, 0x10]);
    data.extend_from_slice(b"JFIF\0");
    data.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 0, 0]);
    data.extend_from_slice(&[0xff, 0xc0, 0x00, 0x11, 0x08]);
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&[3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1]);
    data
}

/// Wraps [`MemoryCatalog`] and counts reads so tests can tell cache hits
/// from catalog round-trips.
#[allow(dead_code)]
#[derive(Default)]
pub struct CountingCatalog {
    pub inner: MemoryCatalog,
    pub gets: AtomicUsize,
    pub inserts: AtomicUsize,
    pub deletes: AtomicUsize,
}

#[allow(dead_code)]
impl CountingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.inner.set_available(available);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl ImageCatalog for CountingCatalog {
    async fn insert(&self, record: ImageRecord, data: Bytes) -> CatalogResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(record, data).await
    }

    async fn get(&self, id: &ImageId) -> CatalogResult<Option<ImageRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }

    async fn read_file(&self, id: &ImageId) -> CatalogResult<Option<Bytes>> {
        self.inner.read_file(id).await
    }

    async fn delete(&self, id: &ImageId) -> CatalogResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn health_check(&self) -> CatalogResult<()> {
        self.inner.health_check().await
    }
}
