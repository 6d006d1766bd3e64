//! Verify HTTP Server
//!
//! Read-only boundary service. Serves the canonical [`VerifyPayload`] for a
//! game so an auditor without ledger access can run the verifier.
//! Handles request validation, error codes and request ids.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::network::protocol::{ErrorBody, ErrorCode, HealthResponse, VerifyPayload, VerifyRequest};
use crate::proof::verify::RecordSource;

/// Default request body limit in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Largest accepted request body.
    pub body_limit: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            body_limit: DEFAULT_BODY_LIMIT,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create config from a variable lookup. Malformed or zero values are
    /// errors.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let mut config = Self::default();
        if let Some(addr) = var("MINES_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| ServerError::Config(format!("MINES_BIND_ADDR: {}", addr)))?;
        }
        if let Some(limit) = var("MINES_BODY_LIMIT") {
            config.body_limit = limit
                .parse::<usize>()
                .ok()
                .filter(|l| *l > 0)
                .ok_or_else(|| ServerError::Config(format!("MINES_BODY_LIMIT: {}", limit)))?;
        }
        Ok(config)
    }
}

/// Verify server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind or serve.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Bad configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

struct AppState<S> {
    source: Arc<S>,
    version: String,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { source: Arc::clone(&self.source), version: self.version.clone() }
    }
}

/// Build the router over `source`.
pub fn router<S: RecordSource + 'static>(source: Arc<S>, config: &ServerConfig) -> Router {
    let state = AppState { source, version: config.version.clone() };

    Router::new()
        .route("/verify", post(verify::<S>).fallback(method_not_allowed))
        .route("/healthz", get(healthz::<S>).fallback(method_not_allowed))
        .layer(DefaultBodyLimit::max(config.body_limit))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

fn error_response(code: ErrorCode, message: impl Into<String>) -> Response {
    let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::new(code, message))).into_response()
}

async fn verify<S: RecordSource + 'static>(
    State(state): State<AppState<S>>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(ErrorCode::InvalidInput, rejection.body_text()),
    };

    let game_id = match request.game_id.as_ref().map(|id| id.parse()) {
        Some(Some(id)) => id,
        Some(None) => return error_response(ErrorCode::InvalidInput, "gameId must be a non-negative integer"),
        None => return error_response(ErrorCode::InvalidInput, "missing gameId"),
    };

    match state.source.fetch(game_id).await {
        Ok(Some(payload)) if !payload.ciphertexts.is_empty() => {
            debug!("Serving record for game {}", game_id);
            (StatusCode::OK, Json::<VerifyPayload>(payload)).into_response()
        }
        Ok(_) => error_response(ErrorCode::NoCiphertext, format!("no ciphertext for game {}", game_id)),
        Err(e) => {
            error!("Record read for game {} failed: {}", game_id, e);
            error_response(ErrorCode::UpstreamReadFailure, e.to_string())
        }
    }
}

async fn healthz<S: RecordSource + 'static>(State(state): State<AppState<S>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: state.version })
}

async fn method_not_allowed() -> Response {
    error_response(ErrorCode::MethodNotAllowed, "method not allowed")
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(header::HeaderName::from_static("x-request-id"), value);
    }
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "http request"
    );
    response
}

/// The verify server.
pub struct VerifyServer<S> {
    /// Server configuration.
    config: ServerConfig,
    /// Where records come from.
    source: Arc<S>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl<S: RecordSource + 'static> VerifyServer<S> {
    /// Create a new verify server.
    pub fn new(config: ServerConfig, source: Arc<S>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { config, source, shutdown_tx }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Router for this server.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.source), &self.config)
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self), fields(bind_addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Verify server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received");
            })
            .await?;
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
