use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Process-wide bandwidth cap consulted after every accounted read.
pub trait Limiter: Send + Sync {
    /// Charge `n` bytes, blocking the caller as long as needed to keep the
    /// global rate under the cap.
    fn limit(&self, n: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl Limiter for Unlimited {
    fn limit(&self, _n: usize) {}
}

/// Token bucket refilled at `rate` bytes per second up to `burst` bytes.
///
/// Reads larger than the bucket are admitted by letting the balance go
/// negative; the caller then sleeps until the debt is repaid.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(rate: u64, burst: u64) -> Self {
        let rate = rate.max(1) as f64;
        let burst = if burst == 0 { rate } else { burst as f64 };
        Self {
            rate,
            burst,
            state: Mutex::new(Bucket { tokens: burst, last: Instant::now() }),
        }
    }

    /// How long a caller charging `n` bytes at `now` has to wait.
    fn reserve(&self, n: usize, now: Instant) -> Duration {
        let mut bucket = self.state.lock();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.last = now;
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.tokens -= n as f64;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }
}

impl Limiter for TokenBucket {
    fn limit(&self, n: usize) {
        if n == 0 {
            return;
        }
        let wait = self.reserve(n, Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_free_then_debt_waits() {
        let bucket = TokenBucket::new(1000, 1000);
        let now = Instant::now();
        assert_eq!(bucket.reserve(1000, now), Duration::ZERO);
        let wait = bucket.reserve(500, now);
        assert!((wait.as_secs_f64() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn refill_is_capped_at_burst() {
        let bucket = TokenBucket::new(100, 200);
        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(bucket.reserve(200, later), Duration::ZERO);
        assert!(bucket.reserve(1, later) > Duration::ZERO);
    }

    #[test]
    fn limit_blocks_when_over_rate() {
        let bucket = TokenBucket::new(10_000, 1_000);
        let start = Instant::now();
        bucket.limit(1_000);
        bucket.limit(1_000);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
