//! Rate limiter unit tests

use rstest::*;
use std::time::{Duration, Instant};

use engine_gateway::{
    RateLimitConfig,
    rate_limiter::{RateLimiter, RequestClass},
};

#[fixture]
fn slow_config() -> RateLimitConfig {
    RateLimitConfig {
        read_per_second: 10,
        write_per_second: 5,
        burst_size: 1,
    }
}

#[rstest]
#[tokio::test]
async fn test_burst_is_served_immediately() {
    let limiter = RateLimiter::new(&RateLimitConfig {
        read_per_second: 1,
        write_per_second: 1,
        burst_size: 5,
    });

    let start = Instant::now();
    for _ in 0..5 {
        limiter.acquire(RequestClass::Read).await;
    }

    assert!(start.elapsed() < Duration::from_millis(100));
}

#[rstest]
#[tokio::test]
async fn test_reads_queue_instead_of_failing(slow_config: RateLimitConfig) {
    let limiter = RateLimiter::new(&slow_config);

    let start = Instant::now();
    for _ in 0..3 {
        limiter.acquire(RequestClass::Read).await;
    }

    // One token up front, then one every 100ms.
    assert!(start.elapsed() >= Duration::from_millis(180));
}

#[rstest]
#[tokio::test]
async fn test_writes_follow_the_write_budget(slow_config: RateLimitConfig) {
    let limiter = RateLimiter::new(&slow_config);

    let start = Instant::now();
    limiter.acquire(RequestClass::Write).await;
    limiter.acquire(RequestClass::Write).await;

    // The write bucket refills every 200ms, slower than the read bucket.
    assert!(start.elapsed() >= Duration::from_millis(180));
}

#[rstest]
#[tokio::test]
async fn test_writes_also_spend_read_tokens(slow_config: RateLimitConfig) {
    let limiter = RateLimiter::new(&slow_config);

    limiter.acquire(RequestClass::Write).await;
    let start = Instant::now();
    limiter.acquire(RequestClass::Read).await;

    assert!(start.elapsed() >= Duration::from_millis(80));
}
