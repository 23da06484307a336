//! Configuration for the engine gateway

use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Credential configuration
    pub auth: AuthConfig,
    /// Supervised query engine configuration
    pub engine: EngineConfig,
    /// Idle shutdown configuration
    pub sleep_mode: SleepModeConfig,
    /// Read/write throughput limits
    pub rate_limiting: RateLimitConfig,
    /// Retry policy for forwarded requests
    pub retry: RetryConfig,
    /// Auxiliary key-value store configuration
    pub redis: RedisConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the gateway listens on
    pub listen_addr: String,
    /// Production mode disables the playground and port reclaiming
    pub production: bool,
    /// Health check path
    pub health_path: String,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret expected on every request
    pub api_key: String,
}

/// Query engine process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the query engine executable
    pub executable_path: String,
    /// Port the engine listens on
    pub port: u16,
    /// Host the engine binds to
    pub host_bind: String,
    /// Path to the schema file handed to the engine
    pub schema_path: String,
    /// Pass `--log-queries`
    pub log_queries: bool,
    /// Pass `--enable-raw-queries`
    pub raw_queries: bool,
    /// Pass `--enable-metrics`
    pub metrics: bool,
    /// Pass `--enable-open-telemetry`
    pub open_telemetry: bool,
    /// Optional collector endpoint for open telemetry
    pub open_telemetry_endpoint: Option<String>,
    /// Pass `--enable-telemetry-in-response`
    pub telemetry_in_response: bool,
    /// Client-side timeout for a single engine call
    pub request_timeout_ms: u64,
    /// Sleep between readiness polls
    pub readiness_poll_interval_ms: u64,
}

/// Idle shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepModeConfig {
    /// Shut the gateway down after a quiet period
    pub enabled: bool,
    /// Length of the quiet period in seconds
    pub after_seconds: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Read operations per second
    pub read_per_second: u32,
    /// Write operations per second
    pub write_per_second: u32,
    /// Burst capacity of each bucket
    pub burst_size: u32,
}

/// Retry configuration for forwarded requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per request, including the first one
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds
    pub backoff_ms: u64,
}

/// Auxiliary key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Expose the `/redis` command bridge
    pub enabled: bool,
    /// `host:port` of the store
    pub address: String,
    /// Optional password
    pub password: Option<String>,
    /// Logical database index
    pub db: i64,
    /// Time allowed to establish a connection
    pub connect_timeout_ms: u64,
    /// Time allowed for a single command reply
    pub response_timeout_ms: u64,
    /// Reconnect attempts after a failed connect
    pub reconnect_attempts: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Log every request with method, uri, status and duration
    pub log_requests: bool,
    /// Expose Prometheus metrics
    pub metrics_enabled: bool,
    /// Address of the Prometheus exporter
    pub metrics_listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4466".to_string(),
            production: false,
            health_path: "/health".to_string(),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable_path: "./query-engine".to_string(),
            port: 4467,
            host_bind: "127.0.0.1".to_string(),
            schema_path: "./schema.prisma".to_string(),
            log_queries: false,
            raw_queries: true,
            metrics: true,
            open_telemetry: false,
            open_telemetry_endpoint: None,
            telemetry_in_response: false,
            request_timeout_ms: 5000,
            readiness_poll_interval_ms: 3,
        }
    }
}

impl Default for SleepModeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            after_seconds: 10,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_per_second: 10_000,
            write_per_second: 2_000,
            burst_size: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 0,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "localhost:6379".to_string(),
            password: None,
            db: 0,
            connect_timeout_ms: 5000,
            response_timeout_ms: 3000,
            reconnect_attempts: 2,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_requests: false,
            metrics_enabled: false,
            metrics_listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

/// Api key used when none is configured
pub const DEFAULT_API_KEY: &str = "SECRET_API_KEY";

impl GatewayConfig {
    /// Load configuration from an optional file, overlaid with
    /// `GATEWAY_`-prefixed environment variables (`GATEWAY_AUTH__API_KEY`).
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auth.api_key.is_empty() {
            bail!("auth.api_key must not be empty");
        }
        if self.rate_limiting.read_per_second == 0 || self.rate_limiting.write_per_second == 0 {
            bail!("rate limits must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.sleep_mode.enabled && self.sleep_mode.after_seconds == 0 {
            bail!("sleep_mode.after_seconds must be greater than zero");
        }
        if self.redis.enabled
            && (self.redis.connect_timeout_ms == 0 || self.redis.response_timeout_ms == 0)
        {
            bail!("redis timeouts must be greater than zero");
        }
        Ok(())
    }

    /// Base URL of the query engine
    #[must_use]
    pub fn engine_url(&self) -> String {
        format!("http://localhost:{}/", self.engine.port)
    }

    /// URL serving the engine's schema document
    #[must_use]
    pub fn engine_sdl_url(&self) -> String {
        format!("http://localhost:{}/sdl", self.engine.port)
    }

    #[must_use]
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.request_timeout_ms)
    }

    #[must_use]
    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine.readiness_poll_interval_ms)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sleep_mode.after_seconds)
    }
}

impl RedisConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
