//! Gateway server: state, dispatch and lifecycle

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
};
use http_body_util::BodyExt;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::{
    auth::{AuthState, auth_middleware},
    command_bridge::{COMMAND_PATH_PREFIX, CommandStore, RedisCommandStore, handle_command},
    config::{DEFAULT_API_KEY, GatewayConfig},
    engine::{EngineTransport, HttpEngineTransport},
    error::GatewayError,
    forwarder::{RequestForwarder, RetryPolicy, normalize_body},
    introspection::{introspection_response, is_introspection},
    metrics,
    middleware::logging_middleware,
    playground,
    rate_limiter::RateLimiter,
    readiness::EngineReadiness,
    sleep_mode::{ActivityGuard, ActivityHandle, IdleShutdownController},
    supervisor::EngineSupervisor,
};

/// Shared state handed to every request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub transport: Arc<dyn EngineTransport>,
    pub readiness: EngineReadiness,
    pub forwarder: Arc<RequestForwarder>,
    pub command_store: Option<Arc<dyn CommandStore>>,
    pub activity: Option<ActivityHandle>,
}

impl AppState {
    /// Build state around an engine transport, with limits and retries from `config`
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        transport: Arc<dyn EngineTransport>,
        shutdown: CancellationToken,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limiting));
        let forwarder = Arc::new(RequestForwarder::new(
            Arc::clone(&transport),
            limiter,
            RetryPolicy::from(&config.retry),
        ));
        let readiness = EngineReadiness::new(
            Arc::clone(&transport),
            config.readiness_poll_interval(),
            shutdown,
        );

        Self {
            config,
            transport,
            readiness,
            forwarder,
            command_store: None,
            activity: None,
        }
    }

    #[must_use]
    pub fn with_command_store(mut self, store: Arc<dyn CommandStore>) -> Self {
        self.command_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_activity(mut self, activity: ActivityHandle) -> Self {
        self.activity = Some(activity);
        self
    }
}

/// Build the router: every path goes through auth, then [`dispatch`].
pub fn create_router(state: AppState) -> Router {
    let auth_state = AuthState {
        config: Arc::clone(&state.config),
    };
    let log_requests = state.config.monitoring.log_requests;

    let mut app = Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    if log_requests {
        app = app.layer(middleware::from_fn(logging_middleware));
    }

    app.layer(TraceLayer::new_for_http())
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    if !state.readiness.wait().await {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let (parts, body) = request.into_parts();
    let path = parts.uri.path();

    if let Some(store) = &state.command_store {
        if is_command_path(path) {
            metrics::record_request("command");
            let body = match read_body(body, state.config.server.max_body_size).await {
                Ok(body) => body,
                Err(status) => return status.into_response(),
            };
            return handle_command(store.as_ref(), &parts.method, path, &body).await;
        }
    }

    if path == state.config.server.health_path {
        metrics::record_request("health");
        return health(state.transport.as_ref()).await;
    }

    // Dropped once the response body has been written.
    let activity = state.activity.as_ref().map(ActivityHandle::guard);

    if playground::wants_playground(state.config.server.production, &parts.headers) {
        metrics::record_request("playground");
        let endpoint = parts
            .uri
            .path_and_query()
            .map_or("/", |path_and_query| path_and_query.as_str());
        let page = Html(playground::render(endpoint)).into_response();
        return report_activity_after_body(page, activity);
    }

    let body = match read_body(body, state.config.server.max_body_size).await {
        Ok(body) => body,
        Err(status) => return report_activity_after_body(status.into_response(), activity),
    };

    let response = if is_introspection(&body) {
        metrics::record_request("introspection");
        introspect(state.transport.as_ref()).await
    } else {
        metrics::record_request("query");
        match state.forwarder.forward(parts.method, normalize_body(body)).await {
            Ok(payload) => json_response(payload),
            Err(e) => {
                error!("Request to query engine failed: {}", e);
                e.into_response()
            }
        }
    };

    report_activity_after_body(response, activity)
}

fn is_command_path(path: &str) -> bool {
    path.strip_prefix(COMMAND_PATH_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, StatusCode> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let too_large = std::error::Error::source(&e)
            .is_some_and(|source| source.is::<http_body_util::LengthLimitError>());
        warn!("Failed to read request body: {}", e);
        if too_large {
            StatusCode::PAYLOAD_TOO_LARGE
        } else {
            StatusCode::BAD_REQUEST
        }
    })
}

async fn health(transport: &dyn EngineTransport) -> Response {
    if transport.probe().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        warn!("Health check failed, query engine not reachable");
        (StatusCode::INTERNAL_SERVER_ERROR, "query engine not reachable").into_response()
    }
}

async fn introspect(transport: &dyn EngineTransport) -> Response {
    let document = match transport.fetch_sdl().await {
        Ok(sdl) => introspection_response(&sdl),
        Err(e) => Err(GatewayError::Introspection(format!("fetching schema failed: {e}"))),
    };

    match document {
        Ok(document) => Json(document).into_response(),
        Err(e) => {
            error!("Introspection failed: {}", e);
            e.into_response()
        }
    }
}

fn json_response(payload: Bytes) -> Response {
    let mut response = Body::from(payload).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Keep `guard` alive until the body has been fully streamed to the client
fn report_activity_after_body(response: Response, guard: Option<ActivityGuard>) -> Response {
    let Some(guard) = guard else {
        return response;
    };

    response.map(|body| {
        Body::new(body.map_frame(move |frame| {
            let _guard = &guard;
            frame
        }))
    })
}

/// Gateway server owning the engine process and the listener
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    shutdown: CancellationToken,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        if config.server.production && config.auth.api_key == DEFAULT_API_KEY {
            warn!("Running in production with the default api key; set GATEWAY_AUTH__API_KEY");
        }

        Ok(Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the gateway when cancelled
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until a signal, idle timeout or engine exit, then stop the engine
    pub async fn start(self) -> Result<()> {
        let config = self.config;
        let shutdown = self.shutdown;

        let addr: SocketAddr = config
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", config.server.listen_addr))?;

        let schema = tokio::fs::read_to_string(&config.engine.schema_path)
            .await
            .with_context(|| format!("failed to read schema file '{}'", config.engine.schema_path))?;
        info!(path = %config.engine.schema_path, bytes = schema.len(), "Loaded schema file");

        let transport: Arc<dyn EngineTransport> = Arc::new(HttpEngineTransport::new(
            config.engine_url(),
            config.engine_sdl_url(),
            config.engine_timeout(),
        )?);
        let mut state = AppState::new(Arc::clone(&config), transport, shutdown.clone());

        if config.redis.enabled {
            let store = RedisCommandStore::new(&config.redis)?;
            state = state.with_command_store(Arc::new(store));
        }

        let idle_task = if config.sleep_mode.enabled {
            let (controller, activity) =
                IdleShutdownController::new(config.idle_timeout(), shutdown.clone());
            state = state.with_activity(activity);
            info!(after_seconds = config.sleep_mode.after_seconds, "Sleep mode enabled");
            Some(tokio::spawn(controller.run()))
        } else {
            None
        };

        let supervisor = EngineSupervisor::from_config(&config, shutdown.clone())
            .start()
            .await
            .context("failed to start query engine")?;

        tokio::spawn(shutdown_on_signal(shutdown.clone()));

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind TCP listener to {}: {}", addr, e);
                shutdown.cancel();
                supervisor.stop().await;
                return Err(anyhow::anyhow!("Failed to bind to address {}: {}", addr, e));
            }
        };
        info!("Server listening on http://{}", addr);

        let app = create_router(state);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;

        // In-flight requests have been answered; the engine can go now.
        shutdown.cancel();
        info!("Server stopped");
        supervisor.stop().await;

        if let Some(task) = idle_task {
            if let Ok(outcome) = task.await {
                debug!(?outcome, "Idle shutdown controller finished");
            }
        }

        served.context("server error")?;
        Ok(())
    }
}

async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
