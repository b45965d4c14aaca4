//! lmbd build service
//!
//! Accepts a ZIP build context over HTTP, unpacks it into a private
//! workspace, builds an image from its `Dockerfile` and can run containers
//! from the result.

pub mod config;
pub mod engine;
pub mod pipeline;
pub mod ports;
pub mod routes;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use build_context::{BuildError, ExtractLimits, WorkspaceManager};
use config::Config;
use engine::{DockerCli, EngineClient, EngineError};
use ports::PortSpecError;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub workspaces: WorkspaceManager,
    pub limits: ExtractLimits,
    pub engine: Arc<dyn EngineClient>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        workspaces: WorkspaceManager,
        limits: ExtractLimits,
        engine: Arc<dyn EngineClient>,
    ) -> Self {
        Self {
            workspaces,
            limits,
            engine,
            max_upload_bytes: config::DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// State wired to the docker CLI as described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let engine = DockerCli::new(config.engine_bin.clone(), Some(config.engine_host.clone()));
        info!(
            workspace_dir = %config.workspace_dir().display(),
            engine_host = %config.engine_host,
            "initialized lmbd application state"
        );
        Self {
            workspaces: WorkspaceManager::new(config.workspace_dir()),
            limits: config.limits(),
            engine: Arc::new(engine),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Everything that can fail while serving a request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ports(#[from] PortSpecError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::Build(err) => match err {
                BuildError::Security { .. } | BuildError::MalformedArchive { .. } => {
                    StatusCode::BAD_REQUEST
                }
                BuildError::Configuration { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                BuildError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                BuildError::Resource { .. } => StatusCode::SERVICE_UNAVAILABLE,
                BuildError::LimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            },
            RequestError::Engine(_) => StatusCode::BAD_GATEWAY,
            RequestError::Ports(_) | RequestError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Custom error type for API responses
#[derive(Debug)]
pub struct AppError {
    pub status_code: StatusCode,
    pub message: String,
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        let status_code = err.status_code();
        match &err {
            RequestError::Build(BuildError::Security { .. }) => {
                warn!("rejected hostile upload: {}", err)
            }
            _ if status_code.is_server_error() => error!("request failed: {}", err),
            _ => info!("request rejected: {}", err),
        }
        AppError {
            status_code,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code, self.message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Health check endpoint
async fn healthz() -> impl IntoResponse {
    "OK"
}

/// Create the Axum application router
pub fn create_app(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/upload", post(routes::upload))
        .route("/run", post(routes::run))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
