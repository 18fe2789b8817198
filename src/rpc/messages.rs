//! Request and response messages of the RPC service.
//!
//! Field names follow the protobuf service; nested structures travel as JSON
//! strings (`*_json`).

use serde::{Deserialize, Serialize};

use crate::storage::{DatasetRecord, ModelRecord};
use crate::training::ModelTypeInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelType {
    pub name: String,
    pub description: String,
    pub hyperparameters_json: String,
}

impl From<ModelTypeInfo> for ModelType {
    fn from(info: ModelTypeInfo) -> Self {
        Self {
            name: info.name,
            description: info.description,
            hyperparameters_json: serde_json::to_string(&info.default_hyperparameters)
                .unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTypesResponse {
    pub model_types: Vec<ModelType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainModelRequest {
    pub model_type: String,
    pub model_name: String,
    pub dataset_name: String,
    pub target_column: String,
    /// Empty means "use defaults"
    #[serde(default)]
    pub hyperparameters_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainModelRequest {
    pub model_name: String,
    pub dataset_name: String,
    pub target_column: String,
    /// Empty means "reuse the recorded hyperparameters"
    #[serde(default)]
    pub hyperparameters_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainModelResponse {
    pub model_name: String,
    pub model_type: String,
    pub metrics_json: String,
    /// Empty when tracking is off
    pub clearml_task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub model_name: String,
    /// JSON array of records
    pub data_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions_json: String,
    pub model_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub created_at: String,
    pub metrics_json: String,
}

impl From<ModelRecord> for ModelInfo {
    fn from(record: ModelRecord) -> Self {
        Self {
            metrics_json: serde_json::to_string(&record.metrics).unwrap_or_else(|_| "{}".to_string()),
            created_at: record.created_at.to_rfc3339(),
            name: record.name,
            model_type: record.model_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteModelRequest {
    pub model_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub size: u64,
    /// 0 when the file could not be parsed
    pub rows: u64,
    pub columns_json: String,
    pub uploaded_at: String,
}

impl From<DatasetRecord> for DatasetInfo {
    fn from(record: DatasetRecord) -> Self {
        Self {
            columns_json: record
                .column_names
                .as_ref()
                .and_then(|c| serde_json::to_string(c).ok())
                .unwrap_or_else(|| "[]".to_string()),
            rows: record.row_count.unwrap_or(0) as u64,
            size: record.size,
            uploaded_at: record.uploaded_at.to_rfc3339(),
            name: record.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDatasetsResponse {
    pub datasets: Vec<DatasetInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDatasetRequest {
    /// Must end in `.csv` or `.json`
    pub file_name: String,
    /// File body as text
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRequest {
    pub dataset_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDatasetsResponse {
    pub success: bool,
    pub message: String,
    pub synced: Vec<String>,
    pub failed: Vec<String>,
}
