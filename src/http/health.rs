//! Operational endpoints.

use super::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::{self, HeaderValue};
use axum::response::{IntoResponse, Response};
use serde_json::json;

const STORE_CHECK_NAME: &str = "Check connectivity to the graph store";

/// Runs the store connectivity check off the async executor.
async fn store_check(state: &AppState) -> Result<(), String> {
    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || service.check()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("health check task failed: {e}")),
    }
}

/// `GET /__health`
pub async fn health(State(state): State<AppState>) -> Response {
    let check = store_check(&state).await;
    let ok = check.is_ok();
    if let Err(e) = &check {
        tracing::warn!(error = %e, "Graph store health check failed");
    }

    let output = check.err().unwrap_or_else(|| "Connectivity OK".to_string());
    (
        StatusCode::OK,
        Json(json!({
            "schemaVersion": 1,
            "systemCode": state.app.system_code,
            "name": state.app.name,
            "description": "Reads and writes content annotations in the graph store",
            "checks": [{
                "name": STORE_CHECK_NAME,
                "ok": ok,
                "severity": 1,
                "businessImpact": "Annotations cannot be read or written",
                "technicalSummary": "Cannot connect to the graph store",
                "checkOutput": output,
            }],
            "ok": ok,
        })),
    )
        .into_response()
}

/// `GET /__gtg`
pub async fn good_to_go(State(state): State<AppState>) -> Response {
    match store_check(&state).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e).into_response(),
    }
}

/// `GET /__ping`
pub async fn ping() -> &'static str {
    "pong"
}

/// `GET /__build-info`
pub async fn build_info(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "name": state.app.name,
            "systemCode": state.app.system_code,
            "version": state.app.version,
        })),
    )
        .into_response()
}

/// `GET /__metrics`
pub async fn render_metrics(State(state): State<AppState>) -> Response {
    let Some(handle) = state.metrics.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
        .into_response()
}
