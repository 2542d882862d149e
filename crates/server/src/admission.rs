//! Upload admission control.
//!
//! Caps the number of uploads this process handles at once. An upload takes a
//! permit before its body is read, so requests that arrive at capacity wait
//! (or are turned away) without having buffered their payload.
//!
//! Capacity is per process. Every instance bounds its own load; total capacity
//! scales with the number of instances.
//!
//! Unlike the rate limiter and the metadata cache this never fails open: a
//! timeout is a definitive "not admitted".

use crate::metrics;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Consecutive timeouts after which each further run is logged at warn.
const SUSTAINED_TIMEOUT_THRESHOLD: u64 = 5;

/// No permit freed up before the deadline.
#[derive(Debug, Error)]
#[error("no upload slot became available within {waited:?}")]
pub struct AdmissionTimeout {
    pub waited: Duration,
}

/// Bounded-concurrency gate for uploads.
#[derive(Clone)]
pub struct UploadAdmission {
    inner: Arc<AdmissionInner>,
}

struct AdmissionInner {
    semaphore: Arc<Semaphore>,
    limit: u32,
    default_timeout: Duration,
    timeouts_total: AtomicU64,
    consecutive_timeouts: AtomicU64,
}

/// Point-in-time view of admission capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AdmissionStatus {
    pub limit: u32,
    pub in_use: u32,
    pub available: u32,
    pub timeouts_total: u64,
}

impl UploadAdmission {
    /// Create a gate admitting at most `limit` concurrent uploads.
    pub fn new(limit: u32, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(AdmissionInner {
                semaphore: Arc::new(Semaphore::new(limit as usize)),
                limit,
                default_timeout,
                timeouts_total: AtomicU64::new(0),
                consecutive_timeouts: AtomicU64::new(0),
            }),
        }
    }

    /// Wait up to `timeout` for a free slot.
    ///
    /// Waiters are served in arrival order. On timeout nothing is held and
    /// there is nothing to release.
    pub async fn acquire(&self, timeout: Duration) -> Result<UploadPermit, AdmissionTimeout> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.wait_for_slot()).await {
            Ok(permit) => {
                self.inner.consecutive_timeouts.store(0, Ordering::Relaxed);
                Ok(self.admitted(permit, started))
            }
            Err(_) => {
                self.record_timeout(timeout);
                Err(AdmissionTimeout { waited: timeout })
            }
        }
    }

    /// Wait for a slot using the configured timeout.
    pub async fn acquire_default(&self) -> Result<UploadPermit, AdmissionTimeout> {
        self.acquire(self.inner.default_timeout).await
    }

    /// Wait for a slot with no deadline.
    pub async fn acquire_unbounded(&self) -> UploadPermit {
        let started = Instant::now();
        let permit = self.wait_for_slot().await;
        self.admitted(permit, started)
    }

    /// Queue on the semaphore until a slot frees up.
    async fn wait_for_slot(&self) -> OwnedSemaphorePermit {
        match self.inner.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            // Never closed: an error here means no slot will ever free up.
            Err(_) => std::future::pending().await,
        }
    }

    fn admitted(&self, permit: OwnedSemaphorePermit, started: Instant) -> UploadPermit {
        metrics::ADMISSION_WAIT_DURATION.observe(started.elapsed().as_secs_f64());
        metrics::UPLOADS_IN_FLIGHT.inc();
        UploadPermit {
            permit: Some(permit),
        }
    }

    fn record_timeout(&self, timeout: Duration) {
        metrics::ADMISSION_TIMEOUTS.inc();
        self.inner.timeouts_total.fetch_add(1, Ordering::Relaxed);
        let run = self
            .inner
            .consecutive_timeouts
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        if run % SUSTAINED_TIMEOUT_THRESHOLD == 0 {
            tracing::warn!(
                consecutive = run,
                limit = self.inner.limit,
                timeout_ms = timeout.as_millis() as u64,
                "Uploads repeatedly timing out waiting for admission; sustained overload"
            );
        } else {
            tracing::debug!(
                consecutive = run,
                timeout_ms = timeout.as_millis() as u64,
                "Upload admission timed out"
            );
        }
    }

    pub fn limit(&self) -> u32 {
        self.inner.limit
    }

    pub fn available(&self) -> u32 {
        u32::try_from(self.inner.semaphore.available_permits()).unwrap_or(u32::MAX)
    }

    pub fn in_use(&self) -> u32 {
        self.inner.limit.saturating_sub(self.available())
    }

    pub fn timeouts_total(&self) -> u64 {
        self.inner.timeouts_total.load(Ordering::Relaxed)
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    pub fn status(&self) -> AdmissionStatus {
        AdmissionStatus {
            limit: self.limit(),
            in_use: self.in_use(),
            available: self.available(),
            timeouts_total: self.timeouts_total(),
        }
    }
}

/// A held upload slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct UploadPermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl UploadPermit {
    /// Free the slot now rather than at end of scope.
    pub fn release(mut self) {
        self.free();
    }

    fn free(&mut self) {
        if self.permit.take().is_some() {
            metrics::UPLOADS_IN_FLIGHT.dec();
        }
    }
}

impl Drop for UploadPermit {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release_restores_capacity() {
        let admission = UploadAdmission::new(2, Duration::from_secs(1));
        let a = admission.acquire_default().await.unwrap();
        let b = admission.acquire_default().await.unwrap();
        assert_eq!(admission.in_use(), 2);
        assert_eq!(admission.available(), 0);

        a.release();
        assert_eq!(admission.in_use(), 1);
        drop(b);
        assert_eq!(admission.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_nothing_held() {
        let admission = UploadAdmission::new(1, Duration::from_secs(1));
        let _held = admission.acquire_unbounded().await;

        let result = admission.acquire(Duration::from_millis(100)).await;
        assert!(result.is_err());
        assert_eq!(admission.in_use(), 1);
        assert_eq!(admission.timeouts_total(), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_succeeds_when_free() {
        let admission = UploadAdmission::new(1, Duration::ZERO);
        assert!(admission.acquire(Duration::ZERO).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_timeouts_reset_on_success() {
        let admission = UploadAdmission::new(1, Duration::from_millis(10));
        let held = admission.acquire_unbounded().await;
        for _ in 0..3 {
            assert!(admission.acquire_default().await.is_err());
        }
        assert_eq!(admission.inner.consecutive_timeouts.load(Ordering::Relaxed), 3);

        drop(held);
        let _permit = admission.acquire_default().await.unwrap();
        assert_eq!(admission.inner.consecutive_timeouts.load(Ordering::Relaxed), 0);
        assert_eq!(admission.status().timeouts_total, 3);
    }
}
