//! Shared key-value store for the lightbox service.
//!
//! This crate provides:
//! - The [`SharedStore`] trait: atomic counters plus TTL'd get/set/delete
//! - Backends: in-process memory and Redis
//! - Deadline helpers so callers can bound every round-trip

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{memory::MemoryStore, redis::RedisStore};
pub use error::{KvError, KvResult};
pub use traits::{SharedStore, parse_counter, with_timeout};

use lightbox_core::config::KvConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a shared store from configuration.
///
/// For the memory backend a sweep task is spawned when the configured
/// interval is non-zero, so this must run inside a Tokio runtime.
pub async fn from_config(config: &KvConfig) -> KvResult<Arc<dyn SharedStore>> {
    config.validate().map_err(KvError::Config)?;

    match config {
        KvConfig::Memory {
            sweep_interval_secs,
        } => {
            let store = Arc::new(MemoryStore::new());
            if *sweep_interval_secs > 0 {
                backends::memory::spawn_sweep_task(
                    store.clone(),
                    Duration::from_secs(*sweep_interval_secs),
                );
            }
            Ok(store)
        }
        KvConfig::Redis {
            url,
            connect_timeout_ms,
        } => {
            let store =
                RedisStore::connect(url, Duration::from_millis(*connect_timeout_ms)).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn from_config_memory_ok() {
        let config = KvConfig::Memory {
            sweep_interval_secs: 0,
        };

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
        store
            .set("hello", Bytes::from_static(b"hi"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            store.get("hello").await.unwrap(),
            Some(Bytes::from_static(b"hi"))
        );
    }

    #[tokio::test]
    async fn from_config_rejects_bad_redis_url() {
        let config = KvConfig::Redis {
            url: "http://localhost:6379".to_string(),
            connect_timeout_ms: 10,
        };
        assert!(matches!(
            from_config(&config).await,
            Err(KvError::Config(_))
        ));
    }

    #[tokio::test]
    async fn with_timeout_maps_elapsed_deadline() {
        let result: KvResult<()> = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(KvError::Timeout(_))));
    }

    #[test]
    fn parse_counter_accepts_decimal_ascii() {
        assert_eq!(parse_counter("k", b"42").unwrap(), 42);
        assert!(parse_counter("k", b"{}").is_err());
    }
}
