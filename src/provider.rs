//! Provider side: builds the manifest once and serves it with the files over HTTP.

use crate::builder::build_manifest;
use crate::error::SyncError;
use crate::path::RelativePath;
use crate::transport::MANIFEST_ROUTE;
use crate::types::ProviderConfig;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared, read-only state behind every request.
#[derive(Clone)]
pub struct ProviderState {
    root: Arc<PathBuf>,
    manifest: Option<Arc<str>>,
}

impl ProviderState {
    /// State serving `manifest` (already serialized) and files below `root`.
    pub fn new(root: PathBuf, manifest: Option<String>) -> Self {
        Self {
            root: Arc::new(root),
            manifest: manifest.map(Arc::from),
        }
    }

    /// Builds the manifest for `config.root` and persists it to `config.manifest_path`.
    ///
    /// Runs once, before any request is accepted.
    pub fn prepare(config: &ProviderConfig) -> Result<Self, SyncError> {
        let manifest = build_manifest(&config.root)?;
        manifest.persist(&config.manifest_path)?;
        Ok(Self::new(config.root.clone(), Some(manifest.serialize())))
    }
}

/// Per-request failures, mapped onto HTTP status codes.
#[derive(Debug)]
enum ServiceError {
    InvalidPath(String),
    NotFound(String),
    ManifestUnavailable,
    Io(io::Error),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServiceError::InvalidPath(msg) => (StatusCode::BAD_REQUEST, msg),
            ServiceError::NotFound(path) => {
                (StatusCode::NOT_FOUND, format!("{} not found", path))
            }
            ServiceError::ManifestUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "manifest has not been built".to_string(),
            ),
            ServiceError::Io(e) => {
                error!("I/O error while serving request: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, message).into_response()
    }
}

/// Create the router with the manifest and file endpoints.
pub fn create_router(state: ProviderState) -> Router {
    Router::new()
        .route(MANIFEST_ROUTE, get(manifest_handler))
        .route("/data/*path", get(file_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn manifest_handler(State(state): State<ProviderState>) -> Result<Response, ServiceError> {
    let manifest = state
        .manifest
        .as_ref()
        .ok_or(ServiceError::ManifestUnavailable)?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        manifest.to_string(),
    )
        .into_response())
}

async fn file_handler(
    State(state): State<ProviderState>,
    UrlPath(raw_path): UrlPath<String>,
) -> Result<Response, ServiceError> {
    debug!("Handling request for {}", raw_path);

    let relative_path = RelativePath::new(raw_path.as_str()).map_err(|e| {
        warn!("Rejected file request: {}", e);
        ServiceError::InvalidPath(e.to_string())
    })?;
    let local = relative_path.to_local(&state.root);

    let metadata = tokio::fs::metadata(&local)
        .await
        .map_err(|e| io_to_service(e, &relative_path))?;
    if !metadata.is_file() {
        return Err(ServiceError::NotFound(relative_path.to_string()));
    }

    let bytes = tokio::fs::read(&local)
        .await
        .map_err(|e| io_to_service(e, &relative_path))?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

fn io_to_service(e: io::Error, path: &RelativePath) -> ServiceError {
    if e.kind() == io::ErrorKind::NotFound {
        ServiceError::NotFound(path.to_string())
    } else {
        ServiceError::Io(e)
    }
}

/// Builds the manifest, binds `config.listen_addr` and serves until `shutdown` resolves.
///
/// # Example
///
/// ```no_run
/// use treesync::{serve, ProviderConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// serve(&ProviderConfig::default(), async {
///     let _ = tokio::signal::ctrl_c().await;
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn serve<F>(config: &ProviderConfig, shutdown: F) -> Result<(), SyncError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = ProviderState::prepare(config)?;
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("Serving {:?} on {}", config.root, listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Provider stopped");
    Ok(())
}
