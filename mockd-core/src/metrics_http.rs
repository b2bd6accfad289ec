//! The metrics exposition HTTP surface:
//! `GET /metrics` returning Prometheus text format with the documented
//! content type.

use std::sync::Arc;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{extract::State, Router};

use crate::metrics::Registry;

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        registry.render(),
    )
}

/// Build a standalone router exposing the registry at `/metrics`. The
/// caller merges this into a larger router, or serves it on its own
/// listener.
pub fn serve_metrics(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn metrics_endpoint_reports_content_type_and_body() {
        let registry = Arc::new(Registry::new());
        registry.counter("mockd_requests_total", "").inc(&[]);
        let app = serve_metrics(registry);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4; charset=utf-8");
    }
}
