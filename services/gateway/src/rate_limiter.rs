//! Read/write throughput shaping using token buckets
//!
//! Requests wait for a token instead of being rejected; the buckets only
//! smooth the load the gateway puts on the engine.

use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;
use crate::metrics;

const DEFAULT_READ_PER_SECOND: NonZeroU32 = nonzero!(10_000u32);
const DEFAULT_WRITE_PER_SECOND: NonZeroU32 = nonzero!(2_000u32);
const DEFAULT_BURST_SIZE: NonZeroU32 = nonzero!(10u32);

/// Marker searched for in request bodies to detect writes.
///
/// This is a substring heuristic, not a parse: a query whose string
/// literals contain the marker is classified as a write too.
pub const WRITE_MARKER: &[u8] = b"mutation";

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Cost class of a forwarded request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Read,
    Write,
}

impl RequestClass {
    /// Classify a raw request body
    #[must_use]
    pub fn of(body: &[u8]) -> Self {
        if contains(body, WRITE_MARKER) {
            Self::Write
        } else {
            Self::Read
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Rate limiter in front of the query engine
pub struct RateLimiter {
    read_limiter: DirectLimiter,
    write_limiter: DirectLimiter,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(DEFAULT_BURST_SIZE);
        let read_quota = Quota::per_second(
            NonZeroU32::new(config.read_per_second).unwrap_or(DEFAULT_READ_PER_SECOND),
        )
        .allow_burst(burst);
        let write_quota = Quota::per_second(
            NonZeroU32::new(config.write_per_second).unwrap_or(DEFAULT_WRITE_PER_SECOND),
        )
        .allow_burst(burst);

        Self {
            read_limiter: GovernorRateLimiter::direct(read_quota),
            write_limiter: GovernorRateLimiter::direct(write_quota),
        }
    }

    /// Wait until the budget for `class` allows another request.
    ///
    /// Writes take a write token and then a read token.
    pub async fn acquire(&self, class: RequestClass) {
        let start = Instant::now();
        if class == RequestClass::Write {
            self.write_limiter.until_ready().await;
        }
        self.read_limiter.until_ready().await;

        let waited = start.elapsed();
        metrics::record_rate_limit_wait(class, waited);
        trace!(class = class.as_str(), waited_us = waited.as_micros(), "Rate limit token acquired");
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
