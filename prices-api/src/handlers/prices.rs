use std::time::Instant;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde_derive::Deserialize;
use tracing::{debug, info};

use prices_common::item::FilterParams;
use prices_common::pipeline::{IngestionPipeline, Upload};
use prices_common::summary::IngestionSummary;

use super::api::ApiError;

/// Query string of an export. Values are kept raw: unparsable ones fall back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    start: Option<String>,
    end: Option<String>,
    min: Option<String>,
    max: Option<String>,
}

pub async fn post_prices(
    State(pipeline): State<IngestionPipeline>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestionSummary>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::RequestDecodingError(e.body_text()))?;

    let mut file: Option<(String, Bytes)> = None;
    let mut declared_kind = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::RequestDecodingError(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let payload = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::RequestDecodingError(e.body_text()))?;
                file = Some((file_name, payload));
            }
            "type" => {
                declared_kind = field
                    .text()
                    .await
                    .map_err(|e| ApiError::RequestDecodingError(e.body_text()))?;
            }
            _ => debug!("ignoring multipart field {:?}", name),
        }
    }

    let (file_name, payload) = match file {
        Some((file_name, payload)) if !file_name.is_empty() => (file_name, payload),
        _ => return Err(ApiError::MissingFile),
    };

    info!(
        "received {} ({} bytes, declared type {:?})",
        file_name,
        payload.len(),
        declared_kind
    );

    let start_time = Instant::now();

    let summary = pipeline
        .ingest(Upload {
            file_name,
            declared_kind,
            payload: payload.to_vec(),
        })
        .await?;

    metrics::histogram!("prices_ingest_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());

    Ok(Json(summary))
}

pub async fn get_prices(
    State(pipeline): State<IngestionPipeline>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = FilterParams::from_query(
        query.start.as_deref(),
        query.end.as_deref(),
        query.min.as_deref(),
        query.max.as_deref(),
    );

    let start_time = Instant::now();

    let archive = pipeline.export(&filter).await?;

    metrics::histogram!("prices_export_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"data.zip\""),
        ],
        archive,
    ))
}
