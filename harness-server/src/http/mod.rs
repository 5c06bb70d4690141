//! HTTP endpoints for the crash harness.
//!
//! Provides the `/mq-test` driver plus health checks and metrics.

pub mod health;
mod metrics;

use crate::dispatcher::{escape_html, DispatchParams};
use crate::server::Harness;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, Extension, Router};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(harness: Arc<Harness>) -> Router {
    let mut router = Router::new()
        .route("/mq-test", get(mq_test_handler))
        .route("/health", get(health::health_handler));

    if harness.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(harness))
}

/// Driver endpoint: one broker operation per request.
async fn mq_test_handler(
    Extension(harness): Extension<Arc<Harness>>,
    Query(params): Query<DispatchParams>,
) -> Response {
    harness
        .metrics()
        .requests_total
        .fetch_add(1, Ordering::Relaxed);

    match harness.dispatcher().dispatch(&params).await {
        Ok(body) => Html(body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(escape_html(&e.to_string())),
        )
            .into_response(),
    }
}
