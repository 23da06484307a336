//! HTTP access to the supervised query engine

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode, header};
use bytes::Bytes;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

/// Raw answer from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Transport to the query engine.
///
/// Implemented over HTTP for the real engine; tests substitute fakes.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    /// Send a query body to the engine's base endpoint
    async fn execute(&self, method: Method, body: Bytes) -> GatewayResult<EngineReply>;

    /// Whether the engine's base endpoint answers with 200
    async fn probe(&self) -> bool;

    /// Fetch the engine's schema document
    async fn fetch_sdl(&self) -> GatewayResult<String>;
}

/// `reqwest` based transport
#[derive(Debug, Clone)]
pub struct HttpEngineTransport {
    client: reqwest::Client,
    engine_url: String,
    sdl_url: String,
}

impl HttpEngineTransport {
    /// Create a transport with a per-call timeout
    pub fn new(
        engine_url: impl Into<String>,
        sdl_url: impl Into<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            engine_url: engine_url.into(),
            sdl_url: sdl_url.into(),
        })
    }
}

#[async_trait]
impl EngineTransport for HttpEngineTransport {
    async fn execute(&self, method: Method, body: Bytes) -> GatewayResult<EngineReply> {
        let response = self
            .client
            .request(method, &self.engine_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        Ok(EngineReply { status, body })
    }

    async fn probe(&self) -> bool {
        match self.client.get(&self.engine_url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Engine probe failed: {}", e);
                false
            }
        }
    }

    async fn fetch_sdl(&self) -> GatewayResult<String> {
        let response = self.client.get(&self.sdl_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::EngineStatus(status));
        }
        Ok(response.text().await?)
    }
}
