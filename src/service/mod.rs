//! Request-level operations shared by the HTTP and RPC surfaces

mod orchestrator;

pub use orchestrator::{Orchestrator, TrainOutcome};

use std::path::Path;
use std::sync::Arc;

use polars::prelude::*;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::{Result, ServiceError};
use crate::storage::{validate_name, ArtifactStore, DatasetRecord, DatasetRepository, MetadataStore, ModelRecord, SyncSummary};
use crate::tabular::records_to_frame;
use crate::tracking::ClearMlTracker;
use crate::training::{CapabilityRegistry, ClassLabel, Hyperparameters, ModelTypeInfo};
use crate::versioning::DvcVersioning;

/// Train a model on a stored dataset
#[derive(Debug, Clone, Deserialize)]
pub struct TrainRequest {
    pub model_type: String,
    pub model_name: String,
    pub dataset_name: String,
    pub target_column: String,
    #[serde(default)]
    pub hyperparameters: Option<Hyperparameters>,
}

/// Retrain an existing model; its type comes from the metadata record
#[derive(Debug, Clone, Deserialize)]
pub struct RetrainRequest {
    pub dataset_name: String,
    pub target_column: String,
    #[serde(default)]
    pub hyperparameters: Option<Hyperparameters>,
}

/// The lifecycle core plus the dataset repository it trains from
pub struct Hub {
    orchestrator: Orchestrator,
    datasets: DatasetRepository,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("orchestrator", &self.orchestrator)
            .field("datasets", &self.datasets)
            .finish()
    }
}

impl Hub {
    /// Wire everything from settings: DVC versioning and ClearML tracking are
    /// enabled when available and configured.
    ///
    /// Builds a blocking HTTP client, so call it outside of an async context.
    pub fn new(settings: &Settings) -> Result<Self> {
        settings.ensure_dirs()?;
        let versioning = Arc::new(DvcVersioning::new(settings));
        let tracker = Arc::new(ClearMlTracker::new(
            &settings.clearml,
            settings.base_dir.join(".cache").join("clearml"),
        ));

        let orchestrator = Orchestrator::new(
            CapabilityRegistry::builtin(),
            ArtifactStore::open(&settings.models_dir)?,
            MetadataStore::open(&settings.models_dir)?,
            tracker,
        );
        let datasets = DatasetRepository::open(&settings.datasets_dir, versioning)?;
        Ok(Self::from_parts(orchestrator, datasets))
    }

    /// Both side-channels disabled, state under `base_dir/{models,datasets}`.
    pub fn local(base_dir: &Path) -> Result<Self> {
        Ok(Self::from_parts(
            Orchestrator::local(&base_dir.join("models"))?,
            DatasetRepository::local(base_dir.join("datasets"))?,
        ))
    }

    pub fn from_parts(orchestrator: Orchestrator, datasets: DatasetRepository) -> Self {
        Self { orchestrator, datasets }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn datasets(&self) -> &DatasetRepository {
        &self.datasets
    }

    pub fn tracking_enabled(&self) -> bool {
        self.orchestrator.tracker().enabled()
    }

    pub fn versioning_enabled(&self) -> bool {
        self.datasets.versioning().enabled()
    }

    // ========================================================================
    // Models
    // ========================================================================

    pub fn model_types(&self) -> Vec<ModelTypeInfo> {
        self.orchestrator.model_types()
    }

    pub fn train(&self, request: &TrainRequest) -> Result<TrainOutcome> {
        let df = self.datasets.load(&request.dataset_name)?;
        let (features, target) = split_target(&df, &request.target_column)?;
        self.orchestrator.train(
            &request.model_type,
            &request.model_name,
            &features,
            &target,
            request.hyperparameters.as_ref(),
        )
    }

    /// An unknown model is `NotFound` before the dataset is touched.
    pub fn retrain(&self, model_name: &str, request: &RetrainRequest) -> Result<TrainOutcome> {
        validate_name("Model", model_name)?;
        if self.orchestrator.record(model_name).is_none() {
            return Err(ServiceError::not_found(format!("Model '{}'", model_name)));
        }
        let df = self.datasets.load(&request.dataset_name)?;
        let (features, target) = split_target(&df, &request.target_column)?;
        self.orchestrator
            .retrain(model_name, &features, &target, request.hyperparameters.as_ref())
    }

    /// Predict for JSON records (`[{"feature": value, ...}, ...]`).
    pub fn predict(&self, model_name: &str, records: &[serde_json::Value]) -> Result<Vec<ClassLabel>> {
        if !self.orchestrator.artifacts().exists(model_name)? {
            return Err(ServiceError::not_found(format!("Model '{}'", model_name)));
        }
        let rows = records_to_frame(records)?;
        self.orchestrator.predict(model_name, &rows)
    }

    pub fn list_models(&self) -> Vec<ModelRecord> {
        self.orchestrator.list()
    }

    pub fn delete_model(&self, model_name: &str) -> Result<()> {
        self.orchestrator.delete(model_name)
    }

    // ========================================================================
    // Datasets
    // ========================================================================

    pub fn list_datasets(&self) -> Result<Vec<DatasetRecord>> {
        self.datasets.list()
    }

    /// Parse an uploaded `.csv`/`.json` body and store it under its file name.
    pub fn upload_dataset(&self, file_name: &str, bytes: &[u8]) -> Result<DatasetRecord> {
        let df = self.datasets.parse_upload(file_name, bytes)?;
        self.datasets.save(file_name, &df)
    }

    pub fn dataset_info(&self, name: &str) -> Result<DatasetRecord> {
        self.datasets.info(name)
    }

    pub fn delete_dataset(&self, name: &str) -> Result<()> {
        self.datasets.delete(name)
    }

    pub fn sync_datasets(&self) -> Result<SyncSummary> {
        self.datasets.sync_all()
    }

    pub fn pull_datasets(&self, file_name: Option<&str>) -> Result<bool> {
        self.datasets.pull(file_name)
    }

    pub fn tracked_datasets(&self) -> Vec<String> {
        self.datasets.tracked()
    }

    /// Download a model artifact registered with the tracking backend.
    pub fn fetch_model(&self, model_name: &str) -> Result<std::path::PathBuf> {
        self.orchestrator.fetch_remote(model_name)
    }
}

/// Separate `target` from the feature columns.
pub fn split_target(df: &DataFrame, target: &str) -> Result<(DataFrame, Series)> {
    let column = df.column(target).map_err(|_| {
        ServiceError::invalid(format!("Target column '{}' not found in dataset", target))
    })?;
    let target_series = column.clone();
    let features = df.drop(target)?;
    Ok((features, target_series))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        let df = DataFrame::new(vec![
            Series::new("a".into(), vec![1.0, 2.0]),
            Series::new("y".into(), vec!["p", "q"]),
        ])
        .unwrap();
        let (features, target) = split_target(&df, "y").unwrap();
        assert_eq!(features.width(), 1);
        assert_eq!(target.len(), 2);
        assert!(matches!(split_target(&df, "nope"), Err(ServiceError::InvalidInput(_))));
    }

    #[test]
    fn test_predict_unknown_model_is_not_found_before_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Hub::local(dir.path()).unwrap();
        assert!(matches!(hub.predict("ghost", &[]), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_train_missing_dataset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Hub::local(dir.path()).unwrap();
        let request = TrainRequest {
            model_type: "RandomForest".into(),
            model_name: "m".into(),
            dataset_name: "absent".into(),
            target_column: "y".into(),
            hyperparameters: None,
        };
        assert!(matches!(hub.train(&request), Err(ServiceError::NotFound(_))));
    }
}
