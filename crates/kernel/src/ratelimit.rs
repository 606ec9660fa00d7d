//! Token-bucket rate limiter (C8). Guarded construction: `capacity` and
//! `refill_rate` must be strictly positive; `initial_tokens` is clamped
//! into `[0, capacity]` rather than silently accepted out of range.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::KernelError;

struct Bucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
    }
}

/// A process-wide (or per-host) token bucket. Cloning shares the same
/// underlying state; `Arc<Mutex<..>>` matches §5's "rate-limit state is
/// process-wide, guarded by a mutex."
#[derive(Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_rate: f64, initial_tokens: f64) -> Result<Self, KernelError> {
        if !(capacity > 0.0) {
            return Err(KernelError::RateLimiterConfig(format!(
                "capacity must be > 0, got {capacity}"
            )));
        }
        if !(refill_rate > 0.0) {
            return Err(KernelError::RateLimiterConfig(format!(
                "refill_rate must be > 0, got {refill_rate}"
            )));
        }
        let clamped = initial_tokens.clamp(0.0, capacity);
        Ok(Self {
            bucket: Arc::new(Mutex::new(Bucket {
                capacity,
                refill_rate,
                tokens: clamped,
                last_refill: Instant::now(),
            })),
        })
    }

    /// Block (async) until `n` tokens are available, then consume them.
    pub async fn acquire(&self, n: f64) {
        loop {
            let wait = {
                let mut b = self.bucket.lock().await;
                b.refill();
                if b.tokens >= n {
                    b.tokens -= n;
                    None
                } else {
                    let deficit = n - b.tokens;
                    Some(deficit / b.refill_rate)
                }
            };
            match wait {
                None => return,
                Some(secs) => {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(secs.max(0.001))).await;
                }
            }
        }
    }

    /// Non-blocking attempt; returns `true` and consumes `n` tokens if
    /// immediately available, `false` (no side effect) otherwise.
    pub async fn try_acquire(&self, n: f64) -> bool {
        let mut b = self.bucket.lock().await;
        b.refill();
        if b.tokens >= n {
            b.tokens -= n;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_refill_rate_rejected_at_construction() {
        let err = RateLimiter::new(10.0, 0.0, 10.0).unwrap_err();
        assert!(matches!(err, KernelError::RateLimiterConfig(_)));
    }

    #[test]
    fn zero_capacity_rejected_at_construction() {
        let err = RateLimiter::new(0.0, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, KernelError::RateLimiterConfig(_)));
    }

    #[test]
    fn initial_tokens_clamped_into_range() {
        let rl = RateLimiter::new(5.0, 1.0, 999.0).unwrap();
        // Should not be able to acquire far more than capacity immediately.
        let ok = tokio_test_block_on(rl.try_acquire(5.0));
        assert!(ok);
        let ok2 = tokio_test_block_on(rl.try_acquire(1.0));
        assert!(!ok2);
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(f)
    }
}
