#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for drillhole ingestion and grade prediction.
//!
//! Accepts CSV uploads (or names of files already in the data directory),
//! lists recently stored samples, reports the load state of the pretrained
//! model artifacts, and serves grade predictions at arbitrary coordinates.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, error, middleware, web};
use smart_mining_database::{PostgresSampleStore, SampleStore, db, run_migrations};
use smart_mining_ingest_models::IngestOptions;
use smart_mining_predict::{DEFAULT_ARTIFACT_DIR, ModelArtifacts};
use smart_mining_server_models::ApiError;

/// Default upload limit for `POST /api/ingest` (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Runtime settings, read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind (`BIND_ADDR`).
    pub bind_addr: String,
    /// Port to bind (`PORT`).
    pub port: u16,
    /// Directory holding the four model artifacts (`ARTIFACT_DIR`).
    pub artifact_dir: PathBuf,
    /// Directory searched by `POST /api/ingest/local` (`DATA_DIR`).
    pub data_dir: PathBuf,
    /// Largest accepted upload body (`MAX_UPLOAD_BYTES`).
    pub max_upload_bytes: usize,
    /// Options applied to every ingestion (`DECIMAL_SEPARATOR`).
    pub ingest_options: IngestOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            data_dir: PathBuf::from("data"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            ingest_options: IngestOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from process environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unset or
    /// unparseable values fall back to the defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let decimal_separator = lookup("DECIMAL_SEPARATOR").map_or(
            defaults.ingest_options.decimal_separator,
            |value| {
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        log::warn!("Ignoring DECIMAL_SEPARATOR={value:?}: expected one character");
                        defaults.ingest_options.decimal_separator
                    }
                }
            },
        );

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            artifact_dir: lookup("ARTIFACT_DIR").map_or(defaults.artifact_dir, PathBuf::from),
            data_dir: lookup("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            max_upload_bytes: lookup("MAX_UPLOAD_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_upload_bytes),
            ingest_options: IngestOptions { decimal_separator },
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// Where ingested samples are stored.
    pub store: Arc<dyn SampleStore>,
    /// Model artifacts loaded at startup.
    pub artifacts: Arc<ModelArtifacts>,
    /// Startup configuration.
    pub config: ServerConfig,
}

/// Registers the `/api` scope.
///
/// Kept separate from [`run_server`] so tests can mount the same routes on
/// an in-process service.
pub fn configure_api(cfg: &mut web::ServiceConfig, max_upload_bytes: usize) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let response =
            HttpResponse::BadRequest().json(ApiError::new("invalid-body", err.to_string()));
        error::InternalError::from_response(err, response).into()
    });

    cfg.service(
        web::scope("/api")
            .app_data(web::PayloadConfig::new(max_upload_bytes))
            .app_data(json_config)
            .route("/health", web::get().to(handlers::health))
            .route("/samples", web::get().to(handlers::samples))
            .route("/ingest", web::post().to(handlers::ingest_upload))
            .route("/ingest/local", web::post().to(handlers::ingest_local))
            .route("/model/status", web::get().to(handlers::model_status))
            .route("/predict", web::post().to(handlers::predict)),
    );
}

/// Starts the smart mining API server.
///
/// Connects to the database, runs migrations, loads the model artifacts,
/// and starts the Actix-Web HTTP server. The caller provides the async
/// runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the database is unreachable,
/// migrations fail, or the HTTP server fails to bind.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServerConfig::from_env();

    log::info!("Connecting to database...");
    let db_conn = db::connect_from_env()
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to connect to database: {e}")))?;

    log::info!("Running migrations...");
    run_migrations(db_conn.as_ref())
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to run migrations: {e}")))?;

    let artifacts = ModelArtifacts::load(&config.artifact_dir);
    if let Err(e) = artifacts.pipeline() {
        log::warn!("Predictions disabled until restart: {e}");
    }

    let bind_addr = config.bind_addr.clone();
    let port = config.port;
    let max_upload_bytes = config.max_upload_bytes;

    let state = web::Data::new(AppState {
        store: Arc::new(PostgresSampleStore::new(Arc::from(db_conn))),
        artifacts: Arc::new(artifacts),
        config,
    });

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(|cfg| configure_api(cfg, max_upload_bytes))
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use actix_web::http::StatusCode;
    use actix_web::test;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use smart_mining_database::DbError;
    use smart_mining_database::memory::InMemorySampleStore;
    use smart_mining_database_models::SampleRow;
    use smart_mining_predict::Stage;
    use smart_mining_predict::stages::{KnnRegressor, Pca, PolynomialFeatures, StandardScaler};

    use smart_mining_sample_models::SampleRecord;

    use super::*;

    struct UnreachableStore;

    #[async_trait]
    impl SampleStore for UnreachableStore {
        async fn insert_many(&self, _records: &[SampleRecord]) -> Result<u64, DbError> {
            Err(DbError::Conversion {
                message: "connection refused".to_string(),
            })
        }

        async fn list_recent(&self, _limit: u32) -> Result<Vec<SampleRow>, DbError> {
            Err(DbError::Conversion {
                message: "connection refused".to_string(),
            })
        }
    }

    fn full_stages() -> Vec<Box<dyn Stage>> {
        let poly: PolynomialFeatures = serde_json::from_value(json!({
            "n_features_in": 3, "degree": 1, "include_bias": false
        }))
        .unwrap();
        let scaler: StandardScaler = serde_json::from_value(json!({
            "mean": [0.0, 0.0, 0.0], "scale": [1.0, 1.0, 1.0]
        }))
        .unwrap();
        let pca: Pca = serde_json::from_value(json!({
            "mean": [0.0, 0.0, 0.0],
            "components": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }))
        .unwrap();
        let knn: KnnRegressor = serde_json::from_value(json!({
            "n_neighbors": 1,
            "fit_x": [[-6.55, 33.42], [0.0, 0.0]],
            "fit_y": [1.75, 0.1],
        }))
        .unwrap();
        vec![
            Box::new(poly),
            Box::new(scaler),
            Box::new(pca),
            Box::new(knn),
        ]
    }

    fn state_with(
        store: Arc<dyn SampleStore>,
        stages: Vec<Box<dyn Stage>>,
        data_dir: &Path,
    ) -> web::Data<AppState> {
        web::Data::new(AppState {
            store,
            artifacts: Arc::new(ModelArtifacts::from_stages(stages)),
            config: ServerConfig {
                data_dir: data_dir.to_path_buf(),
                ..ServerConfig::default()
            },
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state)
                    .configure(|cfg| configure_api(cfg, 1024)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn config_reads_overrides_and_keeps_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9090"),
            ("ARTIFACT_DIR", "/srv/models"),
            ("DECIMAL_SEPARATOR", ","),
            ("MAX_UPLOAD_BYTES", "not-a-number"),
        ]);
        let config = ServerConfig::from_lookup(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.port, 9090);
        assert_eq!(config.artifact_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.ingest_options.decimal_separator, ',');
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.bind_addr, "127.0.0.1");
    }

    #[actix_web::test]
    async fn health_reports_version() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store, full_stages(), Path::new("data")));

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[actix_web::test]
    async fn upload_then_list_samples() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store.clone(), full_stages(), Path::new("data")));

        let req = test::TestRequest::post()
            .uri("/api/ingest?filename=forages.csv")
            .set_payload("X;Y;Depth;Teneur\n1;2;3;0.5\n4;5;abc;0.7\n")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["filename"], "forages.csv");
        assert_eq!(body["rows_received"], 2);
        assert_eq!(body["rows_inserted"], 1);
        assert_eq!(body["rows_dropped"], 1);
        assert_eq!(body["drop_reasons"]["non-numeric:z_coord"], 1);
        assert_eq!(store.len(), 1);

        let req = test::TestRequest::get()
            .uri("/api/samples?limit=5")
            .to_request();
        let samples: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(samples.as_array().unwrap().len(), 1);
        assert_eq!(samples[0]["teneur"], 0.5);
    }

    #[actix_web::test]
    async fn unmappable_upload_is_a_client_error() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store.clone(), full_stages(), Path::new("data")));

        let req = test::TestRequest::post()
            .uri("/api/ingest")
            .set_payload("x,y,z,comment\n1,2,3,a\n")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "unmappable-columns");
        assert_eq!(body["missing"], json!(["teneur"]));
        assert!(store.is_empty());
    }

    #[actix_web::test]
    async fn single_column_upload_is_unparseable() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store.clone(), full_stages(), Path::new("data")));

        let req = test::TestRequest::post()
            .uri("/api/ingest")
            .set_payload("teneur\n0.5\n0.7\n")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "unparseable-file");
        assert!(store.is_empty());
    }

    #[actix_web::test]
    async fn storage_failure_is_a_server_error() {
        let app = app!(state_with(
            Arc::new(UnreachableStore),
            full_stages(),
            Path::new("data")
        ));

        let req = test::TestRequest::post()
            .uri("/api/ingest")
            .set_payload("x,y,z,teneur\n1,2,3,4\n")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "storage-error");

        let req = test::TestRequest::get().uri("/api/samples").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn reuploading_id_rows_reports_duplicates() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store.clone(), full_stages(), Path::new("data")));
        let csv = "id,x,y,z,teneur\n1,1,2,3,0.5\n2,4,5,6,0.7\n";

        for expected_inserted in [2, 0] {
            let req = test::TestRequest::post()
                .uri("/api/ingest")
                .set_payload(csv)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["rows_inserted"], expected_inserted);
            assert_eq!(body["rows_dropped"], 2 - expected_inserted);
        }

        assert_eq!(store.len(), 2);
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store.clone(), full_stages(), Path::new("data")));

        let mut csv = String::from("x,y,z,teneur\n");
        while csv.len() <= 1024 {
            csv.push_str("1,2,3,4\n");
        }
        let req = test::TestRequest::post()
            .uri("/api/ingest")
            .set_payload(csv)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(store.is_empty());
    }

    #[actix_web::test]
    async fn local_ingest_resolves_inside_data_dir() {
        let dir = std::env::temp_dir().join("smart_mining_server_local_ingest");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("forages.csv"), "x,y,z,teneur\n1,2,3,4\n5,6,7,8\n").unwrap();

        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store.clone(), full_stages(), &dir));

        let req = test::TestRequest::post()
            .uri("/api/ingest/local")
            .set_json(json!({ "filename": "forages.csv" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.len(), 2);

        let req = test::TestRequest::post()
            .uri("/api/ingest/local")
            .set_json(json!({ "filename": "absent.csv" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        for bad in ["../secrets.csv", "nested/forages.csv", "..", ""] {
            let req = test::TestRequest::post()
                .uri("/api/ingest/local")
                .set_json(json!({ "filename": bad }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{bad}");
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[actix_web::test]
    async fn model_status_lists_all_artifacts() {
        let store = Arc::new(InMemorySampleStore::new());
        let mut stages = full_stages();
        stages.truncate(2);
        let app = app!(state_with(store, stages, Path::new("data")));

        let req = test::TestRequest::get().uri("/api/model/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["poly", "scaler", "pca", "knn"]);
        assert_eq!(body[0]["loaded"], true);
        assert_eq!(body[2]["loaded"], false);
        assert_eq!(body[2]["state"], "missing-file");
    }

    #[actix_web::test]
    async fn predict_returns_grade_and_label() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store, full_stages(), Path::new("data")));

        let req = test::TestRequest::post()
            .uri("/api/predict")
            .set_json(json!({ "x_coord": -6.55, "y_coord": 33.42, "z_coord": 150.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["predicted_teneur"], 1.75);
        assert_eq!(body["model"], "poly(degree=1)+scaler+pca(n=2)+knn(k=1,uniform)");
    }

    #[actix_web::test]
    async fn predict_names_the_missing_coordinate() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store, full_stages(), Path::new("data")));

        let req = test::TestRequest::post()
            .uri("/api/predict")
            .set_json(json!({ "x_coord": -6.55, "z_coord": 150.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid-input");
        assert_eq!(body["field"], "y_coord");
    }

    #[actix_web::test]
    async fn predict_rejects_malformed_json() {
        let store = Arc::new(InMemorySampleStore::new());
        let app = app!(state_with(store, full_stages(), Path::new("data")));

        let req = test::TestRequest::post()
            .uri("/api/predict")
            .insert_header(("content-type", "application/json"))
            .set_payload(r#"{ "x_coord": "east" }"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid-body");
    }

    #[actix_web::test]
    async fn predict_is_unavailable_without_every_artifact() {
        let store = Arc::new(InMemorySampleStore::new());
        let mut stages = full_stages();
        stages.remove(2);
        let app = app!(state_with(store, stages, Path::new("data")));

        let req = test::TestRequest::post()
            .uri("/api/predict")
            .set_json(json!({ "x_coord": -6.55, "y_coord": 33.42, "z_coord": 150.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "model-unavailable");
        assert_eq!(body["missing"], json!(["pca"]));
    }
}
