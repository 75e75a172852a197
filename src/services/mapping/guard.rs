//! Call guards for external mapping backends
//!
//! Every outbound call goes through a minimum-interval rate limiter (the
//! public endpoints enforce strict quotas) and a circuit breaker so a
//! failing backend is not hammered while it is down. Both are in-memory
//! and reset on process restart.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Rate limiter that enforces minimum interval between calls
pub struct RateLimiter {
    last_call: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Arc::new(Mutex::new(None)),
            min_interval,
        }
    }

    /// Wait until it's safe to make another call
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                drop(last); // Release lock while sleeping
                tokio::time::sleep(wait_time).await;
                last = self.last_call.lock().await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Circuit breaker to prevent hammering a failing service
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: Arc<Mutex<Option<Instant>>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            last_failure: Arc::new(Mutex::new(None)),
            recovery_time,
        }
    }

    /// Check if circuit is open (blocking calls)
    pub fn is_open(&self) -> bool {
        let count = self.failure_count.load(Ordering::Relaxed);
        if count >= self.threshold {
            // Check if recovery time has passed (half-open: allow a retry)
            if let Ok(last) = self.last_failure.try_lock() {
                if let Some(last_time) = *last {
                    if last_time.elapsed() >= self.recovery_time {
                        return false;
                    }
                }
            }
            return true;
        }
        false
    }

    /// Record a failure
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_failure.try_lock() {
            *last = Some(Instant::now());
        }
    }

    /// Record a success (resets failure count)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

/// Rate limiter + circuit breaker for one backend endpoint family
pub struct CallGuard {
    pub limiter: RateLimiter,
    pub breaker: CircuitBreaker,
}

impl CallGuard {
    pub fn new(min_interval: Duration, breaker_threshold: u32, breaker_recovery: Duration) -> Self {
        Self {
            limiter: RateLimiter::new(min_interval),
            breaker: CircuitBreaker::new(breaker_threshold, breaker_recovery),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_enforces_minimum_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        let start = Instant::now();

        // First call should be immediate
        limiter.wait().await;
        let after_first = start.elapsed();
        assert!(after_first < Duration::from_millis(50), "First call should be immediate");

        // Second call should wait
        limiter.wait().await;
        let after_second = start.elapsed();
        assert!(after_second >= Duration::from_millis(100),
            "Second call should wait at least 100ms, took {:?}", after_second);
    }

    #[tokio::test]
    async fn rate_limiter_allows_call_after_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(50));

        limiter.wait().await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let start = Instant::now();
        limiter.wait().await;
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(20),
            "Call after interval should be immediate, took {:?}", elapsed);
    }

    #[test]
    fn circuit_breaker_starts_closed() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.is_open());
    }

    #[test]
    fn circuit_breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        assert!(!breaker.is_open(), "Should not open after 1 failure");

        breaker.record_failure();
        assert!(!breaker.is_open(), "Should not open after 2 failures");

        breaker.record_failure();
        assert!(breaker.is_open(), "Should open after 3 failures");
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "Should not be open, count was reset");
    }

    #[tokio::test]
    async fn circuit_breaker_closes_after_recovery_time() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(50));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Half-open: a retry is allowed
        assert!(!breaker.is_open(), "Circuit breaker should close after recovery time");
    }
}
