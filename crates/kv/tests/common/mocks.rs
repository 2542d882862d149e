use async_trait::async_trait;
use bytes::Bytes;
use lightbox_kv::error::KvResult;
use lightbox_kv::traits::SharedStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a store and counts calls per operation.
#[allow(dead_code)]
pub struct InstrumentedStore<S> {
    pub inner: S,
    pub incrs: AtomicUsize,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
}

#[allow(dead_code)]
impl<S: SharedStore> InstrumentedStore<S> {
    pub fn new(inner: S) -> Arc<Self> {
        Arc::new(Self {
            inner,
            incrs: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> (usize, usize, usize, usize) {
        (
            self.incrs.load(Ordering::SeqCst),
            self.gets.load(Ordering::SeqCst),
            self.sets.load(Ordering::SeqCst),
            self.deletes.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl<S: SharedStore> SharedStore for InstrumentedStore<S> {
    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<u64> {
        self.incrs.fetch_add(1, Ordering::SeqCst);
        self.inner.incr(key, ttl).await
    }

    async fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> KvResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn ping(&self) -> KvResult<()> {
        self.inner.ping().await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
