//! `archivist serve`: the read-routing and migrate HTTP surface.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use archivist_engine::config::types::MigrationConfig;
use archivist_engine::{resolve, Components, MigrationError, ReadRouter, RunOptions};
use archivist_types::error::{ArchiveError, ErrorCategory};
use archivist_types::record::RecordId;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Clone)]
pub(crate) struct AppState {
    config: Arc<MigrationConfig>,
    components: Components,
    router: ReadRouter,
    /// Held for the duration of a `POST /migrate` run.
    migrate_lock: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl AppState {
    pub(crate) fn new(
        config: MigrationConfig,
        components: Components,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let router = resolve::build_router(&config, &components)?;
        Ok(Self {
            config: Arc::new(config),
            components,
            router,
            migrate_lock: Arc::new(Mutex::new(())),
            shutdown,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = ErrorBody {
            error: code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        match err.category {
            ErrorCategory::NotFound => Self::NotFound(err.message),
            ErrorCategory::StoreUnavailable | ErrorCategory::TransientIo => {
                Self::Unavailable(err.to_string())
            }
            ErrorCategory::Permanent | ErrorCategory::Serialization => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Archive(e) => e.into(),
            MigrationError::Infrastructure(e) => Self::Internal(format!("{e:#}")),
        }
    }
}

pub(crate) fn app(state: AppState) -> Router {
    Router::new()
        .route("/customers", get(list_active))
        .route("/customers/:id", get(get_customer))
        .route("/customers/:id/legacy", get(get_legacy))
        .route("/migrate", post(migrate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// `GET /customers`: live records that classify active now.
async fn list_active(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let records = state.router.active(limit).await?;
    Ok(Json(records))
}

/// `GET /customers/:id`: routed lookup, reporting where it was served from.
async fn get_customer(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let routed = state.router.route(RecordId::new(id)).await?;
    Ok(Json(routed))
}

/// `GET /customers/:id/legacy`: the archived document bytes.
async fn get_legacy(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.router.archived(RecordId::new(id)).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], bytes))
}

#[derive(Debug, Default, Deserialize)]
struct MigrateParams {
    #[serde(default)]
    from_start: bool,
}

/// `POST /migrate`: one orchestrator run, answered with its summary.
///
/// The run lives in its own task so a client that disconnects does not
/// abandon it half way; the lock is held until the task ends.
async fn migrate(
    State(state): State<AppState>,
    Query(params): Query<MigrateParams>,
) -> Result<impl IntoResponse, ApiError> {
    let Ok(running) = state.migrate_lock.clone().try_lock_owned() else {
        return Err(ApiError::Conflict("a migration run is already in progress".into()));
    };

    let orchestrator = resolve::build_orchestrator(
        &state.config,
        &state.components,
        RunOptions {
            from_start: params.from_start,
        },
    )
    .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    let cancel = state.shutdown.child_token();
    let run = tokio::spawn(async move {
        let _running = running;
        orchestrator.run(cancel).await
    });
    let summary = run
        .await
        .map_err(|e| ApiError::Internal(format!("migration task failed: {e}")))??;
    Ok(Json(summary))
}

/// Execute the `serve` command.
pub async fn execute(migration_path: &Path, listen: SocketAddr) -> Result<()> {
    let config = super::load_migration(migration_path)?;
    let components = resolve::resolve(&config).await?;
    let shutdown = CancellationToken::new();
    let migration = config.migration.clone();
    let state = AppState::new(config, components, shutdown.clone())?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    tracing::info!(migration, %listen, "Serving customer reads");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
