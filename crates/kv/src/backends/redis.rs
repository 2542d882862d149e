//! Redis shared store backend.
//!
//! Every instance of the service talks to the same Redis, which is what makes
//! rate-limit counters and cached metadata cluster-wide. Counter TTLs use
//! `PEXPIRE ... NX` and therefore need Redis 7 or newer.

use crate::error::{KvError, KvResult};
use crate::traits::SharedStore;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::instrument;

/// Redis-backed shared store.
///
/// Holds a [`ConnectionManager`], which multiplexes one connection and
/// reconnects in the background after a failure. Cloning it per call is cheap.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    /// Connection target with any credentials stripped, for logs.
    endpoint: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis at `url`, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> KvResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| KvError::Timeout(connect_timeout))??;

        let endpoint = redact_url(url);
        tracing::info!(endpoint = %endpoint, "Connected to redis");
        Ok(Self { conn, endpoint })
    }
}

/// Strip the userinfo part of a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX/PEXPIRE reject 0; round sub-millisecond TTLs up.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    #[instrument(skip(self), level = "trace")]
    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<u64> {
        let mut conn = self.conn.clone();
        // One MULTI/EXEC: a counter always carries a TTL.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self), level = "trace")]
    async fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.map(Bytes::from))
    }

    #[instrument(skip(self, value), fields(len = value.len()), level = "trace")]
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_url_hides_credentials() {
        assert_eq!(
            redact_url("redis://:hunter2@cache.internal:6379/0"),
            "redis://***@cache.internal:6379/0"
        );
        assert_eq!(
            redact_url("redis://localhost:6379"),
            "redis://localhost:6379"
        );
    }

    #[test]
    fn ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(61)), 61_000);
    }

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        let result = RedisStore::connect("not a url", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(KvError::Redis(_))));
    }
}
