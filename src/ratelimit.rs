//! In-process token bucket throttling task submission.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, ServiceError, ServiceResult};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `capacity` requests refill evenly over `window`.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        let window_secs = window.as_secs_f64().max(0.001);
        Self {
            capacity,
            refill_per_sec: capacity / window_secs,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token or fail with RATE_LIMITED.
    pub fn try_acquire(&self) -> ServiceResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(ServiceError::new(
                ErrorKind::RateLimited,
                "submission rate limit exceeded",
            )
            .with_suggestion("slow down or raise RATE_LIMIT_REQUESTS"))
        }
    }
}
