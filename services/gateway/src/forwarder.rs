//! Forwarding of query bodies to the engine with bounded retries
//!
//! The engine may still be starting when the first requests arrive, so an
//! attempt that errors, answers with a non-success status or answers with
//! the engine's "Timed out" envelope is retried up to the policy bound.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::engine::EngineTransport;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::rate_limiter::{RateLimiter, RequestClass};

/// Retry bound and pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Fill in `variables: {}` and `operationName: null` when absent.
///
/// Bodies that already carry both fields, or are not JSON objects, are
/// returned untouched.
#[must_use]
pub fn normalize_body(body: Bytes) -> Bytes {
    let Ok(Value::Object(mut object)) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };

    let mut changed = false;
    if !object.contains_key("variables") {
        object.insert("variables".to_string(), Value::Object(serde_json::Map::new()));
        changed = true;
    }
    if !object.contains_key("operationName") {
        object.insert("operationName".to_string(), Value::Null);
        changed = true;
    }
    if !changed {
        return body;
    }

    match serde_json::to_vec(&Value::Object(object)) {
        Ok(normalized) => Bytes::from(normalized),
        Err(_) => body,
    }
}

/// Whether an engine payload is its transient timeout envelope.
///
/// Matches on the leading bytes of `{"errors":..}` plus the message text,
/// which ties this check to the engine's current error format.
#[must_use]
pub fn is_timeout_sentinel(body: &[u8]) -> bool {
    const PREFIX: &[u8] = b"{\"e";
    const MESSAGE: &[u8] = b"Timed out";
    body.starts_with(PREFIX) && body.windows(MESSAGE.len()).any(|window| window == MESSAGE)
}

/// Forwards requests to the engine
pub struct RequestForwarder {
    transport: Arc<dyn EngineTransport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RequestForwarder {
    #[must_use]
    pub fn new(
        transport: Arc<dyn EngineTransport>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
        }
    }

    /// Forward an already normalized body, returning the engine's payload
    pub async fn forward(&self, method: Method, body: Bytes) -> GatewayResult<Bytes> {
        let class = RequestClass::of(&body);

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(method.clone(), body.clone(), class).await {
                Ok(payload) => {
                    metrics::record_engine_attempt("success");
                    debug!(attempt, class = class.as_str(), "Engine request succeeded");
                    return Ok(payload);
                }
                Err(e) => {
                    metrics::record_engine_attempt("failure");
                    warn!(attempt, max_attempts = self.policy.max_attempts, "Engine attempt failed: {}", e);
                    if attempt < self.policy.max_attempts && !self.policy.backoff.is_zero() {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        metrics::record_retries_exhausted();
        Err(GatewayError::RetriesExhausted {
            attempts: self.policy.max_attempts,
        })
    }

    async fn attempt(&self, method: Method, body: Bytes, class: RequestClass) -> GatewayResult<Bytes> {
        self.limiter.acquire(class).await;

        let reply = self.transport.execute(method, body).await?;
        if !reply.status.is_success() {
            return Err(GatewayError::EngineStatus(reply.status));
        }
        if is_timeout_sentinel(&reply.body) {
            return Err(GatewayError::EngineTimedOut);
        }
        Ok(reply.body)
    }
}
