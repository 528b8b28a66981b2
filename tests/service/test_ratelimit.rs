//! Token bucket tests.

use std::time::Duration;

use git_mcp_server::{ErrorKind, RateLimiter};

#[test]
fn bucket_admits_capacity_then_rejects() {
    let limiter = RateLimiter::new(3, Duration::from_secs(60));
    for _ in 0..3 {
        limiter.try_acquire().expect("within capacity");
    }
    let err = limiter.try_acquire().expect_err("over capacity");
    assert_eq!(err.kind, ErrorKind::RateLimited);
}

#[test]
fn bucket_refills_over_the_window() {
    // 10 tokens per 100ms: one token roughly every 10ms.
    let limiter = RateLimiter::new(10, Duration::from_millis(100));
    for _ in 0..10 {
        limiter.try_acquire().expect("drain");
    }
    assert!(limiter.try_acquire().is_err());

    std::thread::sleep(Duration::from_millis(30));
    limiter.try_acquire().expect("refilled fractionally");
}
