//! Token-bucket rate limiter per provider.

use std::time::{Duration, Instant};

/// Token bucket with burst capacity of twice the refill rate.
///
/// Acquisition is non-blocking at this layer; the router turns
/// `time_until_available` into a bounded async wait so no caller parks
/// indefinitely on a saturated provider.
#[derive(Debug)]
pub struct TokenBucket {
    /// Refill rate in tokens per second.
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64) -> Self {
        let rate = rate_per_sec.max(0.01);
        Self {
            rate,
            capacity: rate * 2.0,
            tokens: rate * 2.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until one token will be available.
    pub fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }

    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}
