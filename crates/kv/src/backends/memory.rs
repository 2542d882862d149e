//! In-process shared store backend.
//!
//! Single-process stand-in for Redis. TTLs are enforced lazily on access and
//! by an optional sweep task. The store can be switched "offline" and given
//! artificial latency so callers' fail-open paths can be exercised.

use crate::error::{KvError, KvResult};
use crate::traits::SharedStore;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
enum Value {
    Counter(u64),
    Bytes(Bytes),
}

#[derive(Clone, Debug)]
struct Slot {
    value: Value,
    expires_at: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory key-value store with per-key TTL.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every operation by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of keys currently held, including expired keys not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired key. Returns the number of keys removed.
    ///
    /// Uses `remove_if` so a key refreshed between the scan and the removal survives.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| {
                self.entries
                    .remove_if(key, |_, slot| slot.is_expired(now))
                    .is_some()
            })
            .count()
    }

    async fn enter(&self) -> KvResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable("memory store is offline".to_string()))
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<u64> {
        self.enter().await?;
        let now = Instant::now();

        // The entry guard holds the shard lock, so read-modify-write is atomic
        // with respect to every other caller on the same key.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                if slot.is_expired(now) {
                    *slot = Slot {
                        value: Value::Counter(1),
                        expires_at: now + ttl,
                    };
                    return Ok(1);
                }
                match &mut slot.value {
                    Value::Counter(count) => {
                        *count = count.saturating_add(1);
                        Ok(*count)
                    }
                    Value::Bytes(_) => Err(KvError::NotACounter {
                        key: key.to_string(),
                    }),
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    value: Value::Counter(1),
                    expires_at: now + ttl,
                });
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        self.enter().await?;
        let now = Instant::now();

        let value = match self.entries.get(key) {
            Some(slot) if !slot.is_expired(now) => match &slot.value {
                Value::Counter(count) => Some(Bytes::from(count.to_string())),
                Value::Bytes(bytes) => Some(bytes.clone()),
            },
            Some(_) => None,
            None => return Ok(None),
        };

        if value.is_none() {
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> KvResult<()> {
        self.enter().await?;
        self.entries.insert(
            key.to_string(),
            Slot {
                value: Value::Bytes(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.enter().await?;
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> KvResult<()> {
        self.enter().await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Spawn a background task that periodically drops expired keys.
pub fn spawn_sweep_task(
    store: Arc<MemoryStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged = purged, "Memory store sweep dropped expired keys");
            }
        }
    })
}
