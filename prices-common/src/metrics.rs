use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Add a `/metrics` endpoint to `router` and record HTTP metrics for every route added before it.
/// Installs the global recorder, so call it once per process.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

/// Middleware recording request count and latency per route, method and status class.
/// Requests that match no route share one `unmatched` route label.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |path| path.as_str().to_owned());
    let method = req.method().as_str().to_owned();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("status", status_class(response.status())),
    ];

    metrics::counter!("prices_http_requests_total", &labels).increment(1);
    metrics::histogram!("prices_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

fn status_class(status: StatusCode) -> String {
    format!("{}xx", status.as_u16() / 100)
}
