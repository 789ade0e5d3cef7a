//! Request handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use chrono::{DateTime, Utc};
use classifier_structs::{ClassifierError, JobOutcome, JobState};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ApiError, AppState};

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub model_name: String,
    /// `"Online"` or `"Model Not Loaded"`.
    pub status: String,
    /// Current model metadata, or `{}` without a model.
    pub model_info: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub target_directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub message: String,
    pub task_id: Uuid,
    pub status: String,
}

/// Body of `GET /retrain/status/{task_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub task_id: Uuid,
    pub state: JobState,
    /// Latest progress message.
    pub status: Option<String>,
    pub history: Vec<JobState>,
    pub result: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDataSize {
    pub total_images: usize,
    /// `"Yes"` or `"No (Need more data)"`.
    pub ready_to_train: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationsResponse {
    pub class_distribution: BTreeMap<String, usize>,
    pub new_data_size: NewDataSize,
}

struct UploadedFile {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// Runs filesystem or model work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("Background task failed: {e}")))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let inference = Arc::clone(&state.inference);
    let metadata = blocking(move || inference.status()).await?;

    let (status, model_info) = match metadata {
        Some(metadata) => (
            "Online",
            serde_json::to_value(&metadata)
                .map_err(|e| ApiError::Internal(format!("Failed to encode model info: {e}")))?,
        ),
        None => ("Model Not Loaded", json!({})),
    };

    Ok(Json(StatusResponse {
        model_name: state.config.model_name.clone(),
        status: status.to_string(),
        model_info,
    }))
}

pub async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(ToString::to_string);
        if name.as_deref() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field.bytes().await?.to_vec();
            upload = Some(UploadedFile {
                filename,
                content_type,
                bytes,
            });
        }
    }
    let upload = upload.ok_or_else(|| ApiError::Unprocessable("Field 'file' is required".to_string()))?;

    if !upload.content_type.starts_with("image/") {
        return Err(ApiError::BadRequest("File must be an image.".to_string()));
    }

    let inference = Arc::clone(&state.inference);
    let bytes = upload.bytes;
    let result = blocking(move || inference.predict(&bytes)).await?;

    match result {
        Ok(prediction) => {
            debug!(file = %upload.filename, label = %prediction.label, "Prediction served");
            Ok(Json(PredictionResponse {
                predicted_class: prediction.label,
            }))
        }
        Err(ClassifierError::ModelUnavailable | ClassifierError::StorageCorruption(_)) => Err(
            ApiError::Internal("Prediction failed. Model might not be loaded.".to_string()),
        ),
        Err(error @ ClassifierError::InvalidImage(_)) => {
            Err(ApiError::BadRequest(format!("Prediction failed: {error}")))
        }
        Err(error) => Err(ApiError::Internal(format!("Prediction failed: {error}"))),
    }
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut class_name = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("class_name") => class_name = Some(field.text().await?),
            Some("files") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                files.push(UploadedFile {
                    filename,
                    content_type,
                    bytes,
                });
            }
            other => debug!(field = ?other, "Ignoring unknown form field"),
        }
    }

    let class_name =
        class_name.ok_or_else(|| ApiError::Unprocessable("Field 'class_name' is required".to_string()))?;
    if files.is_empty() {
        return Err(ApiError::Unprocessable("Field 'files' is required".to_string()));
    }

    let dataset = state.dataset.clone();
    let (class_name, target_directory, saved) = blocking(move || {
        let (class_name, dir) = dataset.ensure_class(&class_name)?;
        let mut saved = 0;
        for file in files {
            if !file.content_type.starts_with("image/") {
                debug!(file = %file.filename, content_type = %file.content_type, "Skipping non-image upload");
                continue;
            }
            match dataset.append(&class_name, &file.bytes, &file.filename, &file.content_type) {
                Ok(_) => saved += 1,
                Err(error) => warn!(file = %file.filename, %error, "Failed to save upload"),
            }
        }
        Ok::<_, ClassifierError>((class_name, dir, saved))
    })
    .await??;

    info!(class_name = %class_name, saved, "Stored training images");
    Ok(Json(UploadResponse {
        message: format!("Successfully uploaded {saved} images for class '{class_name}'"),
        target_directory: target_directory.display().to_string(),
    }))
}

pub async fn trigger(State(state): State<AppState>) -> Result<Json<TriggerResponse>, ApiError> {
    let task_id = state.jobs.submit()?;
    Ok(Json(TriggerResponse {
        message: "Retraining task initiated.".to_string(),
        task_id,
        status: "Processing".to_string(),
    }))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let not_found = || ApiError::NotFound(format!("Task {task_id} not found"));
    let id = Uuid::parse_str(&task_id).map_err(|_| not_found())?;
    let job = state.jobs.get(id).ok_or_else(not_found)?;

    Ok(Json(JobStatusResponse {
        task_id: job.id,
        state: job.state,
        status: job.message,
        history: job.history,
        result: job.outcome,
        created_at: job.created_at,
        updated_at: job.updated_at,
    }))
}

pub async fn visualizations(
    State(state): State<AppState>,
) -> Result<Json<VisualizationsResponse>, ApiError> {
    let dataset = state.dataset.clone();
    let summary = blocking(move || dataset.summarize()).await??;
    let ready = summary.is_ready(state.config.ready_threshold);

    Ok(Json(VisualizationsResponse {
        new_data_size: NewDataSize {
            total_images: summary.total,
            ready_to_train: if ready { "Yes" } else { "No (Need more data)" }.to_string(),
            message: format!(
                "Currently {} images available in the dataset directory.",
                summary.total
            ),
        },
        class_distribution: summary.counts,
    }))
}
