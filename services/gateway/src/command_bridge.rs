//! Pass-through command channel to the auxiliary key-value store
//!
//! `GET /redis/set/foo/bar` runs `set foo bar`; `POST /redis` runs the JSON
//! array in the body. Replies are `{"result": ..}` (200) or `{"error": ..}`
//! (400); a nil reply maps to `{"result": null}`.

use async_trait::async_trait;
use axum::{
    Json,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use redis::{
    ConnectionAddr, ConnectionInfo, RedisConnectionInfo,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::{sync::OnceCell, time::timeout};
use tracing::{debug, info, warn};

use crate::config::RedisConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

/// Path prefix diverted to the bridge
pub const COMMAND_PATH_PREFIX: &str = "/redis";

/// Ordered command tokens, executed verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryCommand {
    tokens: Vec<String>,
}

impl AuxiliaryCommand {
    /// Build a command from a JSON array of scalar tokens
    pub fn from_json(body: &[u8]) -> GatewayResult<Self> {
        let values: Vec<Value> = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidCommand(format!("invalid command body: {e}")))?;

        let tokens = values
            .into_iter()
            .map(|value| match value {
                Value::String(text) => Ok(text),
                Value::Number(number) => Ok(number.to_string()),
                Value::Bool(flag) => Ok(if flag { "1" } else { "0" }.to_string()),
                Value::Null => Ok(String::new()),
                other => Err(GatewayError::InvalidCommand(format!(
                    "unsupported command argument: {other}"
                ))),
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        Self::from_tokens(tokens)
    }

    /// Build a command from the path segments after the prefix
    pub fn from_path(path: &str) -> GatewayResult<Self> {
        let rest = path
            .strip_prefix(COMMAND_PATH_PREFIX)
            .unwrap_or(path)
            .trim_start_matches('/');
        Self::from_tokens(rest.split('/').map(str::to_string).collect())
    }

    fn from_tokens(tokens: Vec<String>) -> GatewayResult<Self> {
        match tokens.first() {
            Some(name) if !name.is_empty() => Ok(Self { tokens }),
            _ => Err(GatewayError::InvalidCommand("empty command".to_string())),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.tokens[0]
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Failure reported by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The command produced no value
    NoValue,
    /// Any other failure, with the store's message
    Failed(String),
}

/// Key-value store executing raw commands
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn execute(&self, command: &AuxiliaryCommand) -> Result<Value, StoreError>;
}

/// Run a bridged request and build the JSON envelope
pub async fn handle_command(
    store: &dyn CommandStore,
    method: &Method,
    path: &str,
    body: &[u8],
) -> Response {
    let command = match *method {
        Method::POST => AuxiliaryCommand::from_json(body),
        Method::GET => AuxiliaryCommand::from_path(path),
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };
    let command = match command {
        Ok(command) => command,
        Err(e) => {
            metrics::record_command("invalid");
            return e.into_response();
        }
    };

    debug!(command = command.name(), args = command.args().len(), "Executing store command");
    match store.execute(&command).await {
        Ok(result) => {
            metrics::record_command("ok");
            (StatusCode::OK, Json(json!({ "result": result }))).into_response()
        }
        Err(StoreError::NoValue) => {
            metrics::record_command("nil");
            (StatusCode::OK, Json(json!({ "result": null }))).into_response()
        }
        Err(StoreError::Failed(message)) => {
            metrics::record_command("error");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
    }
}

/// Redis backed store; connects on first use and shares one connection manager.
///
/// Connecting and every command are bounded by the configured timeouts; a
/// store that stops answering yields a failed command instead of a stuck
/// request.
pub struct RedisCommandStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    connect_timeout: Duration,
    response_timeout: Duration,
    reconnect_attempts: usize,
}

impl RedisCommandStore {
    pub fn new(config: &RedisConfig) -> GatewayResult<Self> {
        let (host, port) = split_address(&config.address)?;
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: config.db,
                password: config.password.clone().filter(|password| !password.is_empty()),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info)
            .map_err(|e| GatewayError::Config(format!("invalid redis settings: {e}")))?;

        info!(address = %config.address, db = config.db, "Redis command bridge enabled");
        Ok(Self {
            client,
            connection: OnceCell::new(),
            connect_timeout: config.connect_timeout(),
            response_timeout: config.response_timeout(),
            reconnect_attempts: config.reconnect_attempts,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let connect = self.connection.get_or_try_init(|| {
            let manager_config = ConnectionManagerConfig::new()
                .set_connection_timeout(self.connect_timeout)
                .set_response_timeout(self.response_timeout)
                .set_number_of_retries(self.reconnect_attempts);
            self.client.get_connection_manager_with_config(manager_config)
        });

        match timeout(self.connect_timeout, connect).await {
            Ok(Ok(connection)) => Ok(connection.clone()),
            Ok(Err(e)) => Err(StoreError::Failed(e.to_string())),
            Err(_) => {
                warn!(
                    timeout_ms = self.connect_timeout.as_millis(),
                    "Connecting to redis timed out"
                );
                Err(StoreError::Failed("connection to store timed out".to_string()))
            }
        }
    }
}

#[async_trait]
impl CommandStore for RedisCommandStore {
    async fn execute(&self, command: &AuxiliaryCommand) -> Result<Value, StoreError> {
        let mut connection = self.connection().await?;

        let mut cmd = redis::cmd(command.name());
        for arg in command.args() {
            cmd.arg(arg);
        }

        let query = cmd.query_async(&mut connection);
        let reply: redis::Value = match timeout(self.response_timeout, query).await {
            Ok(reply) => reply.map_err(|e| StoreError::Failed(e.to_string()))?,
            Err(_) => {
                warn!(command = command.name(), "Store command timed out");
                return Err(StoreError::Failed("store command timed out".to_string()));
            }
        };

        match reply {
            redis::Value::Nil => Err(StoreError::NoValue),
            reply => Ok(reply_to_json(reply)),
        }
    }
}

fn split_address(address: &str) -> GatewayResult<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| GatewayError::Config(format!("invalid redis address '{address}'")))?;
    let port = port
        .parse()
        .map_err(|_| GatewayError::Config(format!("invalid redis port in '{address}'")))?;
    Ok((host.to_string(), port))
}

/// Convert a store reply into JSON
#[must_use]
pub fn reply_to_json(reply: redis::Value) -> Value {
    match reply {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(number) => json!(number),
        redis::Value::Double(number) => json!(number),
        redis::Value::Boolean(flag) => Value::Bool(flag),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::SimpleString(text) => Value::String(text),
        redis::Value::BulkString(bytes) => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(reply_to_json).collect())
        }
        redis::Value::Map(pairs) => Value::Array(
            pairs
                .into_iter()
                .flat_map(|(key, value)| [reply_to_json(key), reply_to_json(value)])
                .collect(),
        ),
        other => Value::String(format!("{other:?}")),
    }
}
