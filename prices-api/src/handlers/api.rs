use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use prices_common::archive::ArchiveError;
use prices_common::export::ExportError;
use prices_common::pipeline::IngestError;

/// Body of every non-2xx response. Details stay in the logs.
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to decode multipart request: {0}")]
    RequestDecodingError(String),
    #[error("request holds no file")]
    MissingFile,
    #[error("ingestion failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::RequestDecodingError(_) => {
                (StatusCode::BAD_REQUEST, "invalid multipart request")
            }
            ApiError::MissingFile => (StatusCode::BAD_REQUEST, "missing file"),

            ApiError::Ingest(IngestError::Archive(ArchiveError::MissingCsv)) => {
                (StatusCode::BAD_REQUEST, "archive holds no csv file")
            }
            ApiError::Ingest(IngestError::Archive(_)) => (
                StatusCode::BAD_REQUEST,
                "unsupported file type or type mismatch",
            ),
            ApiError::Ingest(IngestError::Parse(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to read csv")
            }
            ApiError::Ingest(IngestError::Store(_) | IngestError::Internal { .. })
            | ApiError::Export(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            warn!("request rejected: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                error: message.to_owned(),
            }),
        )
            .into_response()
    }
}
