//! HTTP surface.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/content/{uuid}/annotations/{lifecycle}` | `PUT` | Replace a scope |
//! | `/content/{uuid}/annotations/{lifecycle}` | `GET` | Read a scope |
//! | `/content/{uuid}/annotations/{lifecycle}` | `DELETE` | Delete a scope |
//! | `/content/annotations/{lifecycle}/__count` | `GET` | Count relationships |
//! | `/__health`, `/__gtg`, `/__ping`, `/__build-info` | `GET` | Operational checks |
//! | `/__metrics` | `GET` | Prometheus text, when metrics are enabled |
//!
//! Every response carries the request's `X-Request-Id`, generated when the
//! caller did not send one. Store calls run on the blocking pool.

mod handlers;
mod health;

pub use handlers::{BOOKMARK_HEADER, PUBLICATION_HEADER};

use crate::config::{AppInfo, LifecycleConfig};
use crate::forwarder::QueueForwarder;
use crate::observability::{RequestContext, TRANSACTION_ID_HEADER, scope_request_context};
use crate::services::AnnotationsService;
use crate::{Error, Result};
use axum::Router;
use axum::extract::Request;
use axum::http::header::{self, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    /// Annotation operations.
    pub service: AnnotationsService,
    /// Origin and lifecycle mappings.
    pub lifecycles: Arc<LifecycleConfig>,
    /// Forwarder for written sets, when configured.
    pub forwarder: Option<Arc<dyn QueueForwarder>>,
    /// Service identity for the health endpoints.
    pub app: AppInfo,
    /// Prometheus handle; `/__metrics` is mounted only when set.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Creates state without forwarding or metrics.
    #[must_use]
    pub fn new(service: AnnotationsService, lifecycles: Arc<LifecycleConfig>, app: AppInfo) -> Self {
        Self {
            service,
            lifecycles,
            forwarder: None,
            app,
            metrics: None,
        }
    }

    /// Forwards every set written over HTTP.
    #[must_use]
    pub fn with_forwarder(mut self, forwarder: Arc<dyn QueueForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Serves `/__metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(
            "/content/{uuid}/annotations/{lifecycle}",
            get(handlers::get_annotations)
                .put(handlers::put_annotations)
                .delete(handlers::delete_annotations),
        )
        .route(
            "/content/annotations/{lifecycle}/__count",
            get(handlers::count_annotations),
        )
        .route("/__health", get(health::health))
        .route("/__gtg", get(health::good_to_go))
        .route("/__ping", get(health::ping))
        .route("/__build-info", get(health::build_info));

    if state.metrics.is_some() {
        router = router.route("/__metrics", get(health::render_metrics));
    }

    router
        .layer(middleware::from_fn(transaction_id))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the request inside its transaction context and echoes the id.
async fn transaction_id(request: Request, next: Next) -> Response {
    let context = RequestContext::from_header(
        request
            .headers()
            .get(TRANSACTION_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let id = context.transaction_id().to_string();

    let mut response = scope_request_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Binds `0.0.0.0:port` and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "bind".to_string(),
            cause: e.to_string(),
        })?;
    tracing::info!(port, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "serve".to_string(),
            cause: e.to_string(),
        })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down HTTP server");
}
