//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::service::{RetrainRequest, TrainOutcome, TrainRequest};

use super::error::{Result, ServerError};
use super::state::AppState;

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

fn train_response(outcome: &TrainOutcome) -> Value {
    json!({
        "model_name": outcome.record.name,
        "model_type": outcome.record.model_type,
        "metrics": outcome.record.metrics,
        "hyperparameters": outcome.record.hyperparameters,
        "created_at": outcome.record.created_at,
        "clearml_task_id": outcome.tracking_id,
    })
}

// ============================================================================
// Health
// ============================================================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tracking_enabled": state.hub.tracking_enabled(),
        "versioning_enabled": state.hub.versioning_enabled(),
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

// ============================================================================
// Model Handlers
// ============================================================================

pub async fn get_model_types(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let types: Vec<Value> = state
        .hub
        .model_types()
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "hyperparameters": t.default_hyperparameters,
            })
        })
        .collect();
    Ok(Json(Value::Array(types)))
}

pub async fn train_model(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<TrainRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>)> {
    let request = body(payload)?;
    info!(
        model = %request.model_name,
        model_type = %request.model_type,
        dataset = %request.dataset_name,
        "Train request"
    );
    let outcome = state.run(move |hub| hub.train(&request)).await?;
    Ok((StatusCode::CREATED, Json(train_response(&outcome))))
}

pub async fn retrain_model(
    State(state): State<Arc<AppState>>,
    Path(model_name): Path<String>,
    payload: std::result::Result<Json<RetrainRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let request = body(payload)?;
    info!(model = %model_name, dataset = %request.dataset_name, "Retrain request");
    let outcome = state
        .run(move |hub| hub.retrain(&model_name, &request))
        .await?;
    Ok(Json(train_response(&outcome)))
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub model_name: String,
    pub data: Vec<Value>,
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let PredictRequest { model_name, data } = body(payload)?;
    info!(model = %model_name, rows = data.len(), "Predict request");
    let name = model_name.clone();
    let predictions = state.run(move |hub| hub.predict(&name, &data)).await?;
    let predictions: Vec<Value> = predictions.iter().map(|p| p.to_json()).collect();
    Ok(Json(json!({
        "model_name": model_name,
        "predictions": predictions,
    })))
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let models = state.run(|hub| Ok(hub.list_models())).await?;
    Ok(Json(json!(models)))
}

pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(model_name): Path<String>,
) -> Result<Json<Value>> {
    info!(model = %model_name, "Delete model request");
    let name = model_name.clone();
    state.run(move |hub| hub.delete_model(&name)).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Model {} deleted", model_name),
    })))
}

// ============================================================================
// Dataset Handlers
// ============================================================================

pub async fn list_datasets(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let datasets = state.run(|hub| hub.list_datasets()).await?;
    Ok(Json(json!(datasets)))
}

/// Upload a `.csv` or `.json` file; the file name becomes the dataset name
pub async fn upload_dataset(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
    {
        let file_name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;

        info!(file = %file_name, bytes = data.len(), "Received dataset upload");
        let record = state
            .run(move |hub| hub.upload_dataset(&file_name, &data))
            .await?;
        return Ok((StatusCode::CREATED, Json(json!(record))));
    }

    Err(ServerError::BadRequest("No file uploaded".to_string()))
}

pub async fn get_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    let record = state.run(move |hub| hub.dataset_info(&name)).await?;
    Ok(Json(json!(record)))
}

pub async fn delete_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    info!(dataset = %name, "Delete dataset request");
    let target = name.clone();
    state.run(move |hub| hub.delete_dataset(&target)).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Dataset {} deleted", name),
    })))
}

pub async fn sync_datasets(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let summary = state.run(|hub| hub.sync_datasets()).await?;
    let message = if summary.versioning_enabled {
        format!(
            "Synced {} dataset(s), {} failed",
            summary.synced.len(),
            summary.failed.len()
        )
    } else {
        "Dataset versioning is disabled, nothing synced".to_string()
    };
    Ok(Json(json!({
        "success": summary.failed.is_empty(),
        "message": message,
        "synced": summary.synced,
        "failed": summary.failed,
    })))
}
