//! HTTP surface of the Read API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{Page, ReadApi};
use crate::error::{ApiError, Result, SrError};

pub fn router(api: ReadApi) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(get_stats))
        .route("/api/history", get(get_history))
        .route("/api/session/:id", get(get_session))
        .route("/api/sr-history", get(get_rating_series))
        .route("/api/track-stats", get(get_track_stats))
        .route("/api/reset", post(post_reset))
        .with_state(api)
}

/// Bind the listener up front so a busy port is reported before anything starts.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| SrError::Bind { addr, source })
}

/// Serve until `cancel` fires.
pub async fn serve(listener: TcpListener, api: ReadApi, cancel: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "read API listening");
    }
    axum::serve(listener, router(api))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("read API stopped");
    Ok(())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(%status, error = %self, "read API request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SeriesQuery {
    limit: Option<u32>,
}

async fn health(State(api): State<ReadApi>) -> impl IntoResponse {
    let snapshot = api.snapshot();
    Json(json!({
        "status": "ok",
        "revision": snapshot.revision,
        "updated_at": snapshot.updated_at,
    }))
}

async fn get_stats(State(api): State<ReadApi>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(api.stats().await?))
}

async fn get_history(
    State(api): State<ReadApi>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = Page::new(query.limit, query.offset)?;
    Ok(Json(api.history(page).await?))
}

async fn get_session(
    State(api): State<ReadApi>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(api.session(&id).await?))
}

async fn get_rating_series(
    State(api): State<ReadApi>,
    Query(query): Query<SeriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(api.rating_series(query.limit).await?))
}

async fn get_track_stats(State(api): State<ReadApi>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(api.track_stats().await?))
}

async fn post_reset(State(api): State<ReadApi>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = api.reset_rating().await?;
    Ok(Json(snapshot.as_ref().clone()))
}
