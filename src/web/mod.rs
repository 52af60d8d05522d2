//! Operational HTTP surface: health probe and posting statistics.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::db::{count_posts_by_status, count_posts_by_theme, get_recent_error_logs, Database};
use crate::metrics::{Metrics, MetricsSnapshot};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub metrics: Arc<Metrics>,
}

/// Start the web server.
///
/// # Errors
///
/// Returns an error if the listen address is invalid or binding fails.
pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("Invalid web server address")?;

    let app = router().with_state(state).layer(TraceLayer::new_for_http());

    info!(addr = %addr, "Starting web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app)
        .await
        .context("Web server error")?;
    Ok(())
}

fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/stats", get(stats))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    posts_succeeded_total: i64,
    posts_failed_total: i64,
    by_theme: Vec<ThemeStats>,
    recent_errors: Vec<ErrorEntry>,
    process: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct ThemeStats {
    theme_id: String,
    success_count: i64,
    failed_count: i64,
}

#[derive(Debug, Serialize)]
struct ErrorEntry {
    stage: String,
    attempt: i64,
    message: String,
    created_at: String,
}

async fn stats(State(state): State<AppState>) -> Response {
    let pool = state.db.pool();

    let succeeded = match count_posts_by_status(pool, "success").await {
        Ok(n) => n,
        Err(e) => return stats_error(&e),
    };
    let failed = match count_posts_by_status(pool, "failed").await {
        Ok(n) => n,
        Err(e) => return stats_error(&e),
    };
    let by_theme = match count_posts_by_theme(pool).await {
        Ok(rows) => rows
            .into_iter()
            .map(|row| ThemeStats {
                theme_id: row.theme_id,
                success_count: row.success_count,
                failed_count: row.failed_count,
            })
            .collect(),
        Err(e) => return stats_error(&e),
    };
    let recent_errors = match get_recent_error_logs(pool, 20).await {
        Ok(rows) => rows
            .into_iter()
            .map(|row| ErrorEntry {
                stage: row.stage,
                attempt: row.attempt,
                message: row.message,
                created_at: row.created_at,
            })
            .collect(),
        Err(e) => return stats_error(&e),
    };

    Json(StatsResponse {
        posts_succeeded_total: succeeded,
        posts_failed_total: failed,
        by_theme,
        recent_errors,
        process: state.metrics.snapshot(),
    })
    .into_response()
}

fn stats_error(e: &anyhow::Error) -> Response {
    error!("Failed to compute stats: {e}");
    (StatusCode::INTERNAL_SERVER_ERROR, "stats unavailable").into_response()
}
