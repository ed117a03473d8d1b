//! Token bucket rate limiting for broker calls
//!
//! OANDA throttles REST traffic per access token. Every request takes a
//! permit from the bucket first; the bucket refills to its burst size once
//! per window.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Token bucket shared by all clones of a client.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    burst: usize,
    window: Duration,
    last_refill: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    /// Allow `requests_per_second` calls, refilled every second.
    pub fn new(requests_per_second: usize) -> Self {
        Self::with_window(requests_per_second, Duration::from_secs(1))
    }

    /// Allow `burst` calls per `window`.
    pub fn with_window(burst: usize, window: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(burst)),
            burst,
            window,
            last_refill: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Take a permit, waiting for the bucket to refill if it is empty.
    /// Permits are consumed, not returned.
    pub async fn acquire(&self) {
        loop {
            self.refill().await;
            match self.permits.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    return;
                }
                Err(_) => {
                    let remaining = {
                        let last = self.last_refill.lock().await;
                        self.window.saturating_sub(last.elapsed())
                    };
                    tokio::time::sleep(remaining.max(Duration::from_millis(10))).await;
                }
            }
        }
    }

    /// Take a permit if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        self.refill().await;
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Top the bucket back up to its burst size once per window.
    async fn refill(&self) {
        let mut last = self.last_refill.lock().await;
        if last.elapsed() >= self.window {
            let missing = self.burst.saturating_sub(self.permits.available_permits());
            if missing > 0 {
                self.permits.add_permits(missing);
            }
            *last = Instant::now();
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            permits: Arc::clone(&self.permits),
            burst: self.burst,
            window: self.window,
            last_refill: Arc::clone(&self.last_refill),
        }
    }
}
