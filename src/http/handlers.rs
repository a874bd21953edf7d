//! Annotation handlers.

use super::AppState;
use crate::forwarder::ForwardRequest;
use crate::models::{Annotations, decode_annotations};
use crate::observability::{current_request_id, generate_transaction_id};
use crate::services::WriteReceipt;
use crate::storage::Bookmark;
use crate::{Error, Result};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

/// Header carrying the bookmark of a write, and the bookmark a read waits for.
pub const BOOKMARK_HEADER: &str = "graph-bookmark";

/// Comma-separated publications of the content.
pub const PUBLICATION_HEADER: &str = "publication";

const UNSUPPORTED_LIFECYCLE: &str = "annotationLifecycle not supported by this application";

/// `PUT /content/{uuid}/annotations/{lifecycle}`
pub async fn put_annotations(
    State(state): State<AppState>,
    Path((uuid, lifecycle)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !is_json(&headers) {
        return message(
            StatusCode::BAD_REQUEST,
            "Http Header 'Content-Type' is not 'application/json', this is a JSON API",
        );
    }

    let Some(platform_version) = state.lifecycles.platform_version(&lifecycle) else {
        return message(StatusCode::BAD_REQUEST, UNSUPPORTED_LIFECYCLE);
    };
    let platform_version = platform_version.to_string();

    let Some(origin_system) = state.lifecycles.origin_for_lifecycle(&lifecycle) else {
        return message(
            StatusCode::BAD_REQUEST,
            "No Origin-System-Id could be deduced from the lifecycle parameter",
        );
    };
    let origin_system = origin_system.to_string();

    let annotations = match decode_body(&body) {
        Ok(annotations) => annotations,
        Err(e) => {
            return message(
                StatusCode::BAD_REQUEST,
                format!("Error ({e}) parsing annotation request"),
            );
        },
    };

    let transaction_id = current_request_id().unwrap_or_else(generate_transaction_id);
    let publication = publications(&headers);

    let service = state.service.clone();
    let write = {
        let (uuid, lifecycle, platform_version) =
            (uuid.clone(), lifecycle.clone(), platform_version.clone());
        blocking(move || service.replace(&uuid, &lifecycle, &platform_version, &annotations)).await
    };
    let WriteReceipt {
        bookmark,
        annotations,
    } = match write {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::error!(
                transaction_id = %transaction_id,
                content_id = %uuid,
                error = %e,
                "Failed writing annotations"
            );
            return message(status_for(&e), format!("Error creating annotations ({e})"));
        },
    };
    tracing::info!(
        transaction_id = %transaction_id,
        content_id = %uuid,
        "{} successfully written",
        state.lifecycles.message_type
    );

    if let Some(forwarder) = state.forwarder.clone() {
        tracing::debug!(transaction_id = %transaction_id, content_id = %uuid, "Forwarding message to the next queue");
        let request = ForwardRequest {
            transaction_id: transaction_id.clone(),
            origin_system,
            bookmark: bookmark.clone(),
            platform_version,
            content_id: uuid.clone(),
            annotations,
            publication,
        };
        if blocking(move || forwarder.send_message(&request)).await.is_err() {
            return message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to forward message to queue",
            );
        }
    }

    let mut response = message(
        StatusCode::CREATED,
        format!("Annotations for content {uuid} created"),
    );
    insert_bookmark(&mut response, &bookmark);
    response
}

/// `GET /content/{uuid}/annotations/{lifecycle}`
pub async fn get_annotations(
    State(state): State<AppState>,
    Path((uuid, lifecycle)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if state.lifecycles.platform_version(&lifecycle).is_none() {
        return message(StatusCode::BAD_REQUEST, UNSUPPORTED_LIFECYCLE);
    }

    let bookmark = request_bookmark(&headers);
    let service = state.service.clone();
    let content_id = uuid.clone();
    let read = blocking(move || service.read(&content_id, bookmark.as_ref(), &lifecycle)).await;

    match read {
        Ok(Some(annotations)) => (StatusCode::OK, Json(annotations)).into_response(),
        Ok(None) => message(
            StatusCode::NOT_FOUND,
            format!("No annotations found for content with uuid {uuid}."),
        ),
        Err(e) => {
            tracing::error!(content_id = %uuid, error = %e, "Failed getting annotations");
            message(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Error getting annotations ({e})"),
            )
        },
    }
}

/// `DELETE /content/{uuid}/annotations/{lifecycle}`
pub async fn delete_annotations(
    State(state): State<AppState>,
    Path((uuid, lifecycle)): Path<(String, String)>,
) -> Response {
    if state.lifecycles.platform_version(&lifecycle).is_none() {
        return message(StatusCode::BAD_REQUEST, UNSUPPORTED_LIFECYCLE);
    }

    let service = state.service.clone();
    let content_id = uuid.clone();
    match blocking(move || service.delete(&content_id, &lifecycle)).await {
        Ok(outcome) if outcome.found => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            insert_bookmark(&mut response, &outcome.bookmark);
            response
        },
        Ok(_) => message(
            StatusCode::NOT_FOUND,
            format!("No annotations found for content with uuid {uuid}."),
        ),
        Err(e) => {
            tracing::error!(content_id = %uuid, error = %e, "Failed deleting annotations");
            message(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        },
    }
}

/// `GET /content/annotations/{lifecycle}/__count`
pub async fn count_annotations(
    State(state): State<AppState>,
    Path(lifecycle): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(platform_version) = state.lifecycles.platform_version(&lifecycle) else {
        return message(StatusCode::BAD_REQUEST, UNSUPPORTED_LIFECYCLE);
    };
    let platform_version = platform_version.to_string();

    let bookmark = request_bookmark(&headers);
    let service = state.service.clone();
    match blocking(move || service.count(&lifecycle, bookmark.as_ref(), &platform_version)).await {
        Ok(count) => (StatusCode::OK, Json(json!(count))).into_response(),
        Err(e) => message(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// Runs a store call on the blocking pool.
async fn blocking<T, F>(call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "blocking_task".to_string(),
            cause: e.to_string(),
        })?
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

const fn status_for(error: &Error) -> StatusCode {
    if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_lowercase().contains("application/json"))
}

fn decode_body(body: &str) -> Result<Annotations> {
    let payload: Value =
        serde_json::from_str(body).map_err(|e| Error::InvalidInput(e.to_string()))?;
    decode_annotations(payload)
}

fn publications(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(PUBLICATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn request_bookmark(headers: &HeaderMap) -> Option<Bookmark> {
    Bookmark::from_optional(
        headers
            .get(BOOKMARK_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

fn insert_bookmark(response: &mut Response, bookmark: &Bookmark) {
    if let Ok(value) = HeaderValue::from_str(bookmark.as_str()) {
        response.headers_mut().insert(BOOKMARK_HEADER, value);
    }
}
