use std::convert::Infallible;

use axum::{extract::DefaultBodyLimit, routing, Router};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use prices_common::pipeline::IngestionPipeline;

use super::prices;

pub fn add_routes(
    router: Router,
    pipeline: IngestionPipeline,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index))
        .route(
            "/api/v0/prices",
            routing::get(prices::get_prices)
                .post(prices::post_prices)
                .with_state(pipeline)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "prices api"
}
