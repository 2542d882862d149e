//! Shared store trait definition.

use crate::error::{KvError, KvResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

/// A key-value store shared by every process instance.
///
/// Keys are opaque strings; callers namespace them. Every operation is
/// atomic per key. No multi-key transaction is offered or needed.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically increment the integer counter at `key` and return the new value.
    ///
    /// A missing or expired key starts from zero and gets `ttl` attached.
    /// The TTL of an existing key is left untouched, so a counter always
    /// expires relative to its first increment.
    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<u64>;

    /// Get the value at `key`. Counters read back as decimal ASCII.
    async fn get(&self, key: &str) -> KvResult<Option<Bytes>>;

    /// Store `value` at `key`, replacing any prior value and TTL.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> KvResult<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Check the store is reachable.
    async fn ping(&self) -> KvResult<()>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

/// Run a store operation under a deadline, folding an elapsed deadline into
/// [`KvError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, op: F) -> KvResult<T>
where
    F: Future<Output = KvResult<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(KvError::Timeout(limit)),
    }
}

/// Parse a counter value as returned by [`SharedStore::get`].
pub fn parse_counter(key: &str, value: &[u8]) -> KvResult<u64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| KvError::NotACounter {
            key: key.to_string(),
        })
}
