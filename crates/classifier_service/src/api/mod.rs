//! HTTP API.

mod error;
mod routes;

use std::sync::Arc;

use artifact_store::ArtifactStore;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use config::Config;
use image_dataset::DatasetDirectory;
use ml_model::ModelEngine;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use routes::{
    JobStatusResponse, NewDataSize, PredictionResponse, StatusResponse, TriggerResponse,
    UploadResponse, VisualizationsResponse,
};

use crate::inference::InferenceService;
use crate::jobs::JobQueue;
use crate::retrain::RetrainRunner;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dataset: DatasetDirectory,
    pub inference: Arc<InferenceService>,
    pub jobs: Arc<JobQueue>,
}

impl AppState {
    /// Wires the services together and starts the retraining worker.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(config: Config, store: Arc<ArtifactStore>, engine: Arc<dyn ModelEngine>) -> Self {
        let dataset = DatasetDirectory::new(&config.dataset_dir);
        let inference = Arc::new(InferenceService::new(
            Arc::clone(&store),
            Arc::clone(&engine),
        ));
        let runner = Arc::new(RetrainRunner::new(
            dataset.clone(),
            store,
            engine,
            &config.training,
        ));
        let jobs = Arc::new(JobQueue::start(runner, config.job_retention));

        Self {
            config: Arc::new(config),
            dataset,
            inference,
            jobs,
        }
    }
}

/// Builds the router with CORS, request tracing and the upload size limit.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(routes::health))
        .route("/status", get(routes::status))
        .route("/predict", post(routes::predict))
        .route("/retrain/upload", post(routes::upload))
        .route("/retrain/trigger", post(routes::trigger))
        .route("/retrain/status/:task_id", get(routes::job_status))
        .route("/visualizations", get(routes::visualizations))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
