//! Health and metrics endpoints. The tool-call transport itself (what
//! carries a `ToolCall` in and a `ToolResponse` out) is out of scope per
//! spec.md §A.1; this is just the small amount of HTTP surface an operator
//! needs to point a load balancer and a scraper at.

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder,
    TextEncoder,
};
use tower_http::trace::TraceLayer;

pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buf) {
        tracing::error!(error = %err, "failed to encode metrics");
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (axum::http::StatusCode::OK, String::from_utf8_lossy(&buf).into_owned())
}
