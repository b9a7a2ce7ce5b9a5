//! Per-source request pacing.
//!
//! Each external service gets one [`RateLimiter`]: a minimum spacing between
//! request starts plus a cap on requests in flight. Limiters are shared via
//! `Arc` between the adapters and resolver tasks that talk to the same host.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

/// Spacing + concurrency cap for one external source
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
    in_flight: Semaphore,
}

impl RateLimiter {
    /// # Arguments
    ///
    /// * `name` - Source name used in logs
    /// * `interval` - Minimum time between request starts
    /// * `max_concurrent` - Requests allowed in flight at once (at least 1)
    pub fn new(name: &'static str, interval: Duration, max_concurrent: usize) -> Self {
        Self {
            name,
            interval,
            last_request: Mutex::new(None),
            in_flight: Semaphore::new(max_concurrent.max(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for a concurrency slot, then for the spacing interval.
    ///
    /// The returned permit must be held for the duration of the request.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        let permit = self.in_flight.acquire().await.ok()?;
        self.wait_for_rate_limit().await;
        Some(permit)
    }

    /// Wait for rate limit interval
    async fn wait_for_rate_limit(&self) {
        if self.interval.is_zero() {
            return;
        }
        // Held across the sleep so that concurrent callers queue up.
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                debug!(source = self.name, wait_ms = wait.as_millis() as u64, "Rate limit wait");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Limiters for every external source touched in one run
#[derive(Debug, Clone)]
pub struct SourceLimits {
    pub arxiv: Arc<RateLimiter>,
    pub eutils: Arc<RateLimiter>,
    pub crossref: Arc<RateLimiter>,
    pub unpaywall: Arc<RateLimiter>,
    /// PMC id converter and article downloads
    pub pmc: Arc<RateLimiter>,
    /// Arbitrary hosts reached through candidate URLs or the proxy
    pub web: Arc<RateLimiter>,
}

impl SourceLimits {
    pub fn from_config(config: &crate::config::Config) -> Self {
        let downloads = config.max_concurrent_downloads;
        Self {
            arxiv: Arc::new(RateLimiter::new("arxiv", config.arxiv_interval, 1)),
            eutils: Arc::new(RateLimiter::new("eutils", config.pubmed_interval(), 1)),
            crossref: Arc::new(RateLimiter::new("crossref", config.crossref_interval, 2)),
            unpaywall: Arc::new(RateLimiter::new("unpaywall", Duration::from_millis(100), downloads)),
            pmc: Arc::new(RateLimiter::new("pmc", config.pubmed_interval(), 2)),
            web: Arc::new(RateLimiter::new("web", Duration::ZERO, downloads)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spacing_between_requests() {
        let limiter = RateLimiter::new("test", Duration::from_millis(50), 1);
        let start = Instant::now();
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_wait() {
        let limiter = RateLimiter::new("test", Duration::ZERO, 2);
        let start = std::time::Instant::now();
        for _ in 0..5 {
            assert!(limiter.acquire().await.is_some());
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let limiter = RateLimiter::new("test", Duration::ZERO, 1);
        let first = limiter.acquire().await;
        assert!(first.is_some());
        assert!(limiter.in_flight.try_acquire().is_err());
        drop(first);
        assert!(limiter.in_flight.try_acquire().is_ok());
    }
}
