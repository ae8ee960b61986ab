// Interval rate limiter for remote embedding/completion APIs.
//
// Remote providers publish request-per-second limits; exceeding them gets
// the whole run throttled. Each request waits until at least one interval
// has passed since the previous one. The local ONNX backend carries no
// limiter at all.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// A simple rate limiter that enforces a maximum request rate.
#[derive(Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a new rate limiter that allows `requests_per_second` requests per second.
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / requests_per_second),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait until a request is allowed, then return.
    ///
    /// If we're within the rate limit, this returns immediately.
    /// If we need to wait, it sleeps for the appropriate duration.
    pub async fn acquire(&self) {
        let mut last_request = self.last_request.lock().await;
        let now = Instant::now();

        if let Some(last) = *last_request {
            let elapsed = now.duration_since(last);
            if elapsed < self.interval {
                let sleep_time = self.interval - elapsed;
                // Drop the lock before sleeping so other tasks aren't blocked
                drop(last_request);
                tokio::time::sleep(sleep_time).await;
                // Re-acquire after sleeping
                last_request = self.last_request.lock().await;
            }
        }

        *last_request = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(1.0);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_second_request_is_delayed() {
        let limiter = RateLimiter::new(2.0); // 2 QPS = 500ms between requests
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(
            start.elapsed() >= Duration::from_millis(400),
            "Expected ~500ms delay, got {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_high_rate_barely_waits() {
        let limiter = RateLimiter::new(1000.0);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
