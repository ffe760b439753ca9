// =============================================================================
// Token-bucket rate limiting — per endpoint class
// =============================================================================
//
// The provider enforces request quotas per endpoint class. We pace ourselves
// with one token bucket per class: the bulk snapshot class (hot path) and the
// historical-bars class (refresh job) NEVER share a bucket, so a long refresh
// run cannot starve the scan loop.
//
// Bucket parameters come from Settings, not compile-time constants.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::BucketParams;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket. `acquire` suspends until a token is available;
/// `try_acquire` never blocks.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

/// Point-in-time view of a bucket, for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub available: f64,
}

impl TokenBucket {
    pub fn new(params: BucketParams) -> Self {
        Self {
            capacity: params.capacity,
            refill_per_sec: params.refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: params.capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = Instant::now();
        }
    }

    /// Take `n` tokens if available. Returns `false` without blocking when the
    /// bucket cannot cover the request right now.
    pub fn try_acquire(&self, n: f64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// How long until `n` tokens will be available, assuming no competitors.
    pub fn wait_hint(&self, n: f64) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= n {
            return Duration::ZERO;
        }
        let deficit = n - state.tokens;
        Duration::from_secs_f64(deficit / self.refill_per_sec.max(1e-9))
    }

    /// Suspend until `n` tokens have been taken.
    pub async fn acquire(&self, n: f64) {
        loop {
            if self.try_acquire(n) {
                return;
            }
            let wait = self.wait_hint(n).max(Duration::from_millis(25));
            debug!(wait_ms = wait.as_millis() as u64, "rate-limit bucket drained, pacing");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let mut state = self.state.lock();
        self.refill(&mut state);
        BucketSnapshot {
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
            available: state.tokens,
        }
    }

    #[cfg(test)]
    fn backdate_refill(&self, by: Duration) {
        self.state.lock().last_refill -= by;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: f64, refill: f64) -> TokenBucket {
        TokenBucket::new(BucketParams {
            capacity,
            refill_per_sec: refill,
        })
    }

    #[test]
    fn burst_is_capped_at_capacity() {
        let b = bucket(3.0, 1.0);
        assert!(b.try_acquire(1.0));
        assert!(b.try_acquire(1.0));
        assert!(b.try_acquire(1.0));
        assert!(!b.try_acquire(1.0));
    }

    #[test]
    fn refill_restores_tokens_at_configured_rate() {
        let b = bucket(5.0, 2.0);
        assert!(b.try_acquire(5.0));
        assert!(!b.try_acquire(1.0));

        // Simulate one second passing: 2 tokens back.
        b.backdate_refill(Duration::from_secs(1));
        assert!(b.try_acquire(2.0));
        assert!(!b.try_acquire(0.5));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let b = bucket(2.0, 10.0);
        b.backdate_refill(Duration::from_secs(60));
        assert!(b.try_acquire(2.0));
        assert!(!b.try_acquire(0.1));
    }

    #[test]
    fn wait_hint_reflects_deficit() {
        let b = bucket(1.0, 1.0);
        assert!(b.try_acquire(1.0));
        let hint = b.wait_hint(1.0);
        assert!(hint > Duration::from_millis(500));
        assert!(hint <= Duration::from_secs(1));
    }
}
