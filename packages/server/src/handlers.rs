//! HTTP handler functions for the smart mining API.

use std::path::{Component, Path};

use actix_web::{HttpResponse, web};
use smart_mining_database_models::MAX_RECENT_LIMIT;
use smart_mining_ingest::{IngestError, ingest_bytes, ingest_path};
use smart_mining_predict::PredictError;
use smart_mining_server_models::{
    ApiError, ApiHealth, ApiSample, IngestQueryParams, LocalIngestRequest, PredictRequest,
    SamplesQueryParams,
};

use crate::AppState;

/// Name used for uploads that arrive without `?filename=`.
const DEFAULT_UPLOAD_NAME: &str = "upload.csv";

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/samples`
///
/// Lists the most recently stored samples, newest first.
pub async fn samples(
    state: web::Data<AppState>,
    params: web::Query<SamplesQueryParams>,
) -> HttpResponse {
    let limit = params
        .limit
        .unwrap_or(MAX_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);

    match state.store.list_recent(limit).await {
        Ok(rows) => {
            let samples: Vec<ApiSample> = rows.into_iter().map(ApiSample::from).collect();
            HttpResponse::Ok().json(samples)
        }
        Err(e) => {
            log::error!("Failed to list samples: {e}");
            HttpResponse::InternalServerError()
                .json(ApiError::new("storage-error", "Failed to list samples"))
        }
    }
}

/// `POST /api/ingest`
///
/// Ingests the raw request body as one CSV file.
pub async fn ingest_upload(
    state: web::Data<AppState>,
    params: web::Query<IngestQueryParams>,
    body: web::Bytes,
) -> HttpResponse {
    let filename = params
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_UPLOAD_NAME);

    match ingest_bytes(
        state.store.as_ref(),
        &body,
        filename,
        &state.config.ingest_options,
    )
    .await
    {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => ingest_error_response(filename, &e),
    }
}

/// `POST /api/ingest/local`
///
/// Ingests a file that already sits in the configured data directory.
/// Only bare file names are accepted.
pub async fn ingest_local(
    state: web::Data<AppState>,
    body: web::Json<LocalIngestRequest>,
) -> HttpResponse {
    let filename = body.filename.trim();

    if !is_bare_file_name(filename) {
        log::warn!("Rejected local ingest of {filename:?}");
        return HttpResponse::BadRequest().json(
            ApiError::new(
                "invalid-filename",
                "filename must be a bare file name inside the data directory",
            )
            .with_field("filename"),
        );
    }

    let path = state.config.data_dir.join(filename);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return HttpResponse::NotFound().json(ApiError::new(
            "not-found",
            format!("{filename} not found in the data directory"),
        ));
    }

    match ingest_path(state.store.as_ref(), &path, &state.config.ingest_options).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => ingest_error_response(filename, &e),
    }
}

/// `GET /api/model/status`
pub async fn model_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.artifacts.status())
}

/// `POST /api/predict`
pub async fn predict(state: web::Data<AppState>, body: web::Json<PredictRequest>) -> HttpResponse {
    let (Some(x_coord), Some(y_coord), Some(z_coord)) = (body.x_coord, body.y_coord, body.z_coord)
    else {
        let field = [
            ("x_coord", body.x_coord),
            ("y_coord", body.y_coord),
            ("z_coord", body.z_coord),
        ]
        .into_iter()
        .find_map(|(name, value)| value.is_none().then_some(name))
        .unwrap_or("x_coord");

        return HttpResponse::BadRequest().json(
            ApiError::new("invalid-input", format!("{field} is required")).with_field(field),
        );
    };

    match smart_mining_predict::predict(&state.artifacts, x_coord, y_coord, z_coord) {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(PredictError::InvalidInput { field }) => HttpResponse::BadRequest().json(
            ApiError::new("invalid-input", format!("{field} must be a finite number"))
                .with_field(field.to_string()),
        ),
        Err(PredictError::Unavailable(e)) => {
            log::warn!("Prediction requested while {e}");
            HttpResponse::ServiceUnavailable()
                .json(ApiError::new("model-unavailable", e.to_string()).with_missing(&e.missing))
        }
        Err(e @ PredictError::NonFinite { .. }) => {
            log::error!("Prediction failed: {e}");
            HttpResponse::InternalServerError()
                .json(ApiError::new("non-finite-prediction", e.to_string()))
        }
    }
}

/// Whether `name` is a single normal path component (no separators, no
/// `.`/`..`, not absolute).
fn is_bare_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\']) {
        return false;
    }

    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn ingest_error_response(filename: &str, error: &IngestError) -> HttpResponse {
    match error {
        IngestError::UnparseableFile { .. } => {
            log::warn!("Rejected {filename}: {error}");
            HttpResponse::BadRequest().json(ApiError::new("unparseable-file", error.to_string()))
        }
        IngestError::UnmappableColumns(e) => {
            log::warn!("Rejected {filename}: {error}");
            HttpResponse::BadRequest().json(
                ApiError::new("unmappable-columns", error.to_string()).with_missing(&e.missing),
            )
        }
        IngestError::Storage(_) => {
            log::error!("Failed to store {filename}: {error}");
            HttpResponse::InternalServerError()
                .json(ApiError::new("storage-error", "Failed to store samples"))
        }
        IngestError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
            HttpResponse::NotFound().json(ApiError::new("not-found", error.to_string()))
        }
        IngestError::Io(_) => {
            log::error!("Failed to read {filename}: {error}");
            HttpResponse::InternalServerError().json(ApiError::new("io-error", error.to_string()))
        }
    }
}
