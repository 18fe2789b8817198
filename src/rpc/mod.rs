//! RPC surface: `POST /rpc/{Method}` with a JSON message body.
//!
//! Mirrors the HTTP API operation for operation; both call the same
//! [`Hub`](crate::service::Hub) methods.

pub mod messages;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;

use crate::error::ServiceError;
use crate::server::{AppState, ServerError};
use crate::service::{RetrainRequest, TrainOutcome, TrainRequest};
use crate::training::parse_hyperparameters;
use messages::*;

/// Status codes understood by RPC clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    NotFound,
    InvalidArgument,
    Internal,
    Unimplemented,
}

impl RpcCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcCode::NotFound => "NOT_FOUND",
            RpcCode::InvalidArgument => "INVALID_ARGUMENT",
            RpcCode::Internal => "INTERNAL",
            RpcCode::Unimplemented => "UNIMPLEMENTED",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            RpcCode::NotFound => StatusCode::NOT_FOUND,
            RpcCode::InvalidArgument => StatusCode::BAD_REQUEST,
            RpcCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            RpcCode::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

/// Error status returned by a failed call
#[derive(Debug, Clone)]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for RpcStatus {
    fn from(err: ServiceError) -> Self {
        ServerError::from(err).into()
    }
}

impl From<ServerError> for RpcStatus {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::NotFound(msg) => RpcStatus::new(RpcCode::NotFound, format!("{} not found", msg)),
            ServerError::BadRequest(msg) => RpcStatus::new(RpcCode::InvalidArgument, msg),
            ServerError::Internal(msg) => {
                tracing::error!(detail = %msg, "Internal RPC error");
                RpcStatus::new(RpcCode::Internal, "An internal error occurred. Check server logs for details.")
            }
        }
    }
}

impl IntoResponse for RpcStatus {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code.as_str(),
            "message": self.message,
        }));
        (self.code.http_status(), body).into_response()
    }
}

type RpcResult = std::result::Result<Response, RpcStatus>;

fn decode<T: DeserializeOwned>(body: &[u8]) -> std::result::Result<T, RpcStatus> {
    serde_json::from_slice(body)
        .map_err(|e| RpcStatus::new(RpcCode::InvalidArgument, format!("Malformed request message: {}", e)))
}

fn reply<T: Serialize>(message: T) -> RpcResult {
    Ok(Json(message).into_response())
}

fn train_reply(outcome: TrainOutcome) -> RpcResult {
    reply(TrainModelResponse {
        model_name: outcome.record.name,
        model_type: outcome.record.model_type,
        metrics_json: serde_json::to_string(&outcome.record.metrics).map_err(ServiceError::from)?,
        clearml_task_id: outcome.tracking_id.unwrap_or_default(),
    })
}

async fn call(state: &AppState, method: &str, body: &[u8]) -> RpcResult {
    match method {
        "HealthCheck" => reply(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),

        "GetModelTypes" => reply(ModelTypesResponse {
            model_types: state.hub.model_types().into_iter().map(ModelType::from).collect(),
        }),

        "TrainModel" => {
            let req: TrainModelRequest = decode(body)?;
            let request = TrainRequest {
                hyperparameters: parse_hyperparameters(&req.hyperparameters_json)?,
                model_type: req.model_type,
                model_name: req.model_name,
                dataset_name: req.dataset_name,
                target_column: req.target_column,
            };
            let outcome = state.run(move |hub| hub.train(&request)).await?;
            train_reply(outcome)
        }

        "RetrainModel" => {
            let req: RetrainModelRequest = decode(body)?;
            let request = RetrainRequest {
                hyperparameters: parse_hyperparameters(&req.hyperparameters_json)?,
                dataset_name: req.dataset_name,
                target_column: req.target_column,
            };
            let name = req.model_name;
            let outcome = state.run(move |hub| hub.retrain(&name, &request)).await?;
            train_reply(outcome)
        }

        "Predict" => {
            let req: PredictRequest = decode(body)?;
            let records: Vec<serde_json::Value> = serde_json::from_str(&req.data_json).map_err(|e| {
                RpcStatus::new(RpcCode::InvalidArgument, format!("data_json must be a JSON array of records: {}", e))
            })?;
            let name = req.model_name.clone();
            let predictions = state.run(move |hub| hub.predict(&name, &records)).await?;
            let values: Vec<serde_json::Value> = predictions.iter().map(|p| p.to_json()).collect();
            reply(PredictResponse {
                predictions_json: serde_json::to_string(&values).map_err(ServiceError::from)?,
                model_name: req.model_name,
            })
        }

        "ListModels" => {
            let models = state.run(|hub| Ok(hub.list_models())).await?;
            reply(ListModelsResponse {
                models: models.into_iter().map(ModelInfo::from).collect(),
            })
        }

        "DeleteModel" => {
            let req: DeleteModelRequest = decode(body)?;
            let name = req.model_name.clone();
            state.run(move |hub| hub.delete_model(&name)).await?;
            reply(DeleteResponse {
                success: true,
                message: format!("Model {} deleted", req.model_name),
            })
        }

        "ListDatasets" => {
            let datasets = state.run(|hub| hub.list_datasets()).await?;
            reply(ListDatasetsResponse {
                datasets: datasets.into_iter().map(DatasetInfo::from).collect(),
            })
        }

        "UploadDataset" => {
            let req: UploadDatasetRequest = decode(body)?;
            let record = state
                .run(move |hub| hub.upload_dataset(&req.file_name, req.content.as_bytes()))
                .await?;
            reply(DatasetInfo::from(record))
        }

        "GetDataset" => {
            let req: DatasetRequest = decode(body)?;
            let record = state.run(move |hub| hub.dataset_info(&req.dataset_name)).await?;
            reply(DatasetInfo::from(record))
        }

        "DeleteDataset" => {
            let req: DatasetRequest = decode(body)?;
            let name = req.dataset_name.clone();
            state.run(move |hub| hub.delete_dataset(&name)).await?;
            reply(DeleteResponse {
                success: true,
                message: format!("Dataset {} deleted", req.dataset_name),
            })
        }

        "SyncDatasets" => {
            let summary = state.run(|hub| hub.sync_datasets()).await?;
            let message = if summary.versioning_enabled {
                format!("Synced {} dataset(s), {} failed", summary.synced.len(), summary.failed.len())
            } else {
                "Dataset versioning is disabled, nothing synced".to_string()
            };
            reply(SyncDatasetsResponse {
                success: summary.failed.is_empty(),
                message,
                synced: summary.synced,
                failed: summary.failed,
            })
        }

        other => Err(RpcStatus::new(
            RpcCode::Unimplemented,
            format!("Unknown method '{}'", other),
        )),
    }
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    body: Bytes,
) -> Response {
    info!(method = %method, bytes = body.len(), "RPC call");
    match call(&state, &method, &body).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Create the RPC router
pub fn create_rpc_router(state: Arc<AppState>) -> Router {
    let max_body = state.config.max_upload_size;
    Router::new()
        .route("/rpc/:method", post(dispatch))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let status: RpcStatus = ServiceError::not_found("Model 'x'").into();
        assert_eq!(status.code, RpcCode::NotFound);
        let status: RpcStatus = ServiceError::UnknownCapability("SVM".into()).into();
        assert_eq!(status.code, RpcCode::InvalidArgument);
        let status: RpcStatus = ServiceError::internal("disk").into();
        assert_eq!(status.code, RpcCode::Internal);
        assert!(!status.message.contains("disk"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let err = decode::<DeleteModelRequest>(b"{\"nope\": 1}").unwrap_err();
        assert_eq!(err.code, RpcCode::InvalidArgument);
    }
}
