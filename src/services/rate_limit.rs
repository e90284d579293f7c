// src/services/rate_limit.rs

//! Token-bucket throttle for requests to the source site.
//!
//! One token is earned per `interval`, up to `capacity` tokens. Waiters are
//! served in arrival order because the bucket lock is fair.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::models::CrawlerConfig;

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, interval: Duration, capacity: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_nanos() / interval.as_nanos()).min(capacity as u128) as u32;
        if earned == 0 {
            return;
        }

        self.tokens = (self.tokens + earned).min(capacity);
        if self.tokens == capacity {
            // A full bucket does not bank time towards future tokens.
            self.last_refill = now;
        } else {
            self.last_refill += interval * earned;
        }
    }
}

/// Shared throttle; safe to use from concurrent tasks behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    capacity: u32,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket.
    pub fn new(interval: Duration, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            interval,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.request_interval_ms),
            config.burst,
        )
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let mut bucket = self.bucket.lock().await;
        loop {
            let now = Instant::now();
            bucket.refill(self.interval, self.capacity, now);
            if bucket.tokens > 0 {
                bucket.tokens -= 1;
                return;
            }

            let next = bucket.last_refill + self.interval;
            sleep(next.saturating_duration_since(now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sequential_acquires_are_spaced_by_interval() {
        let interval = Duration::from_millis(250);
        let limiter = RateLimiter::new(interval, 1);

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= interval * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_capacity_is_available_up_front() {
        let interval = Duration::from_millis(250);
        let limiter = RateLimiter::new(interval, 3);

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < interval);

        limiter.acquire().await;
        assert!(start.elapsed() >= interval);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_does_not_exceed_capacity() {
        let interval = Duration::from_millis(100);
        let limiter = RateLimiter::new(interval, 2);

        sleep(Duration::from_secs(10)).await;
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // Two banked tokens, then two more at one per interval.
        assert!(start.elapsed() >= interval * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_rate() {
        let interval = Duration::from_millis(250);
        let limiter = Arc::new(RateLimiter::new(interval, 1));

        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= interval * 3);
    }

    #[tokio::test]
    async fn zero_interval_never_blocks() {
        let limiter = RateLimiter::new(Duration::ZERO, 1);
        for _ in 0..100 {
            limiter.acquire().await;
        }
    }
}
