//! Test helpers and fakes

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::Value;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio_util::sync::CancellationToken;

use engine_gateway::{
    AppState, GatewayConfig, GatewayError, GatewayResult,
    command_bridge::{AuxiliaryCommand, CommandStore, StoreError},
    create_router,
    engine::{EngineReply, EngineTransport},
};

pub const TEST_API_KEY: &str = "test-api-key";

pub const DEFAULT_ENGINE_REPLY: &str = r#"{"data":{"findManyUser":[]}}"#;

/// Test configuration factory
pub fn create_test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.api_key = TEST_API_KEY.to_string();
    config.server.production = true;
    config.engine.readiness_poll_interval_ms = 1;
    config.monitoring.log_requests = false;
    config
}

/// Scripted engine outcome for one call
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(StatusCode, &'static str),
    Unavailable,
}

/// In-memory engine transport with call counters
#[derive(Debug)]
pub struct FakeTransport {
    replies: Mutex<VecDeque<Scripted>>,
    probes_script: Mutex<VecDeque<bool>>,
    sdl: Option<String>,
    executions: AtomicUsize,
    probes: AtomicUsize,
    bodies: Mutex<Vec<Bytes>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            probes_script: Mutex::new(VecDeque::new()),
            sdl: None,
            executions: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        }
    }

    /// Outcomes for the next calls; once exhausted every call succeeds
    pub fn with_replies(self, replies: Vec<Scripted>) -> Self {
        *self.replies.lock().unwrap() = replies.into();
        self
    }

    /// Probe results for the next probes; once exhausted every probe succeeds
    pub fn with_probes(self, probes: Vec<bool>) -> Self {
        *self.probes_script.lock().unwrap() = probes.into();
        self
    }

    pub fn with_sdl(mut self, sdl: &str) -> Self {
        self.sdl = Some(sdl.to_string());
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.bodies
            .lock()
            .unwrap()
            .last()
            .map(|body| serde_json::from_slice(body).unwrap())
    }
}

#[async_trait]
impl EngineTransport for FakeTransport {
    async fn execute(&self, _method: Method, body: Bytes) -> GatewayResult<EngineReply> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(body);

        let scripted = self.replies.lock().unwrap().pop_front();
        match scripted.unwrap_or(Scripted::Reply(StatusCode::OK, DEFAULT_ENGINE_REPLY)) {
            Scripted::Reply(status, body) => Ok(EngineReply {
                status,
                body: Bytes::from_static(body.as_bytes()),
            }),
            Scripted::Unavailable => Err(GatewayError::EngineUnavailable(
                "connection refused".to_string(),
            )),
        }
    }

    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.probes_script.lock().unwrap().pop_front().unwrap_or(true)
    }

    async fn fetch_sdl(&self) -> GatewayResult<String> {
        self.sdl
            .clone()
            .ok_or(GatewayError::EngineStatus(StatusCode::NOT_FOUND))
    }
}

/// In-memory command store recording what it was asked to run
#[derive(Debug)]
pub struct FakeStore {
    reply: Result<Value, StoreError>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl FakeStore {
    pub fn new(reply: Result<Value, StoreError>) -> Self {
        Self {
            reply,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandStore for FakeStore {
    async fn execute(&self, command: &AuxiliaryCommand) -> Result<Value, StoreError> {
        self.commands.lock().unwrap().push(command.tokens().to_vec());
        self.reply.clone()
    }
}

pub fn test_state(config: GatewayConfig, transport: Arc<FakeTransport>) -> AppState {
    crate::init_test_env();
    AppState::new(Arc::new(config), transport, CancellationToken::new())
}

pub fn test_app(config: GatewayConfig, transport: Arc<FakeTransport>) -> Router {
    create_router(test_state(config, transport))
}

/// Authorized JSON request with a bearer credential
pub fn authorized_json(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TEST_API_KEY}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
