//! drydock host: configuration, bootstrap, restart supervision, and the
//! health surface.

pub mod bootstrap;
pub mod config;
pub mod migrate;
pub mod restart;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Extension, Json, Router};
use config::{Config, LoggingConfig};
use drydock_db::{Backend, BackendResolver, DbError, SqlBackend};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide database resolver.
    pub resolver: Arc<BackendResolver>,
    /// The loaded configuration.
    pub config: Arc<Config>,
}

/// Returns the resolver's backend, constructing it off the async runtime on
/// first use.
///
/// # Errors
///
/// Returns the construction error; a later call retries.
pub async fn connection(resolver: &Arc<BackendResolver>) -> Result<&Backend, DbError> {
    if !resolver.is_initialized() {
        let resolver = Arc::clone(resolver);
        tokio::task::spawn_blocking(move || resolver.get_connection().map(|_| ())).await??;
    }
    resolver.get_connection()
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Database health: runs `SELECT 1` through the resolver.
async fn health_db(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let ping = async {
        let backend = connection(&state.resolver).await?;
        backend.query("SELECT 1", &[]).await?;
        Ok::<_, DbError>(backend.kind())
    };

    match ping.await {
        Ok(kind) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "backend": kind.as_str() })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": e.to_string() })),
            )
        }
    }
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/db", get(health_db))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

/// Installs the global `tracing` subscriber.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
