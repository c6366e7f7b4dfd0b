use std::sync::Arc;

use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prices_common::metrics::setup_metrics_routes;
use prices_common::pipeline::{IngestConfig, IngestionPipeline};
use prices_common::store::{ItemStore, MemoryItemStore, PgItemStore};
use prices_common::validation::SystemClock;

mod config;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let ingest_config = IngestConfig::new(
        config.dedup_key,
        config.id_policy,
        config.store_timeout.0,
    )
    .expect("invalid ingestion configuration");

    let store: Arc<dyn ItemStore> = if config.in_memory_store {
        info!("keeping items in memory, nothing will survive a restart");
        Arc::new(MemoryItemStore::new())
    } else {
        Arc::new(
            PgItemStore::new(&config.database_url, config.max_pg_connections)
                .await
                .expect("failed to initialize store"),
        )
    };

    let pipeline = IngestionPipeline::new(store, Arc::new(SystemClock {}), ingest_config);

    let app = handlers::add_routes(
        Router::new(),
        pipeline,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = if config.export_prometheus {
        setup_metrics_routes(app).expect("failed to install metrics recorder")
    } else {
        app
    };

    info!("listening on {}", config.bind());

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start prices-api http server, {}", e),
    }
}
