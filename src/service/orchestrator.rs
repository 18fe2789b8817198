//! Train / retrain / predict / list / delete over the artifact store, the
//! metadata index and the tracking side-channel

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, Utc};
use polars::prelude::*;
use serde_json::{json, Value};

use crate::error::{Result, ServiceError};
use crate::storage::{validate_name, ArtifactStore, MetadataStore, ModelRecord};
use crate::tracking::{DisabledTracker, ExperimentTracker, RunObserver};
use crate::training::{
    CapabilityRegistry, ClassLabel, ClassificationMetrics, Hyperparameters, ModelTypeInfo,
    NoopObserver, TrainedUnit,
};

/// Result of a successful train or retrain
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub record: ModelRecord,
    pub metrics: ClassificationMetrics,
    pub tracking_id: Option<String>,
    pub unit: TrainedUnit,
}

/// Single entry point for the model lifecycle.
///
/// Holds no lock of its own; two concurrent writes to one name race and the
/// last writer wins.
pub struct Orchestrator {
    registry: CapabilityRegistry,
    artifacts: ArtifactStore,
    metadata: MetadataStore,
    tracker: Arc<dyn ExperimentTracker>,
}

impl Orchestrator {
    pub fn new(
        registry: CapabilityRegistry,
        artifacts: ArtifactStore,
        metadata: MetadataStore,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Self {
        Self {
            registry,
            artifacts,
            metadata,
            tracker,
        }
    }

    /// Built-in capabilities, no tracking, state under `models_dir`.
    pub fn local(models_dir: &std::path::Path) -> Result<Self> {
        Ok(Self::new(
            CapabilityRegistry::builtin(),
            ArtifactStore::open(models_dir)?,
            MetadataStore::open(models_dir)?,
            Arc::new(DisabledTracker),
        ))
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn tracker(&self) -> &dyn ExperimentTracker {
        self.tracker.as_ref()
    }

    pub fn model_types(&self) -> Vec<ModelTypeInfo> {
        self.registry.types()
    }

    pub fn record(&self, name: &str) -> Option<ModelRecord> {
        self.metadata.get(name)
    }

    /// Train a new model (or overwrite one) under `name`.
    pub fn train(
        &self,
        model_type: &str,
        name: &str,
        features: &DataFrame,
        target: &Series,
        hyperparameters: Option<&Hyperparameters>,
    ) -> Result<TrainOutcome> {
        validate_name("Model", name)?;
        let mut unit = self.registry.create_unit(model_type, hyperparameters)?;
        tracing::info!(model = %name, model_type = %model_type, rows = features.height(), "Training started");

        let run_id = self.open_run(name, &unit);
        if let Some(run) = run_id.as_deref() {
            self.tracker.log_progress(
                run,
                &format!("Starting training of model {} of type {}", name, model_type),
                None,
            );
        }

        let trained = match run_id.as_deref() {
            Some(run) => unit.train(features, target, &RunObserver::new(self.tracker.as_ref(), run)),
            None => unit.train(features, target, &NoopObserver),
        };
        let metrics = match trained {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!(model = %name, error = %e, "Training failed");
                if let Some(run) = run_id.as_deref() {
                    self.tracker.log_progress(run, &format!("Training failed: {}", e), None);
                    self.tracker.close_run(run);
                }
                return Err(e);
            }
        };

        if let Some(run) = run_id.as_deref() {
            self.tracker.log_progress(run, &format!("Saving model {}", name), None);
        }
        let path = match self.artifacts.save(name, &unit) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(model = %name, error = %e, "Saving model failed");
                if let Some(run) = run_id.as_deref() {
                    self.tracker.log_progress(run, &format!("Saving model failed: {}", e), None);
                    self.tracker.close_run(run);
                }
                return Err(e);
            }
        };

        if let Some(run) = run_id.as_deref() {
            self.publish_run(run, name, &unit, &metrics, &path);
        }

        let record = ModelRecord {
            name: name.to_string(),
            model_type: unit.model_type().to_string(),
            created_at: Utc::now(),
            hyperparameters: unit.hyperparameters().clone(),
            metrics: metrics.to_map(),
            tracking_id: run_id.clone(),
        };
        self.metadata.upsert(record.clone())?;

        tracing::info!(
            model = %name,
            accuracy = metrics.accuracy,
            tracking_id = ?run_id,
            "Model trained and saved"
        );
        Ok(TrainOutcome {
            record,
            metrics,
            tracking_id: run_id,
            unit,
        })
    }

    /// Train `name` again with its recorded type. Recorded hyperparameters are
    /// reused unless `hyperparameters` is given.
    pub fn retrain(
        &self,
        name: &str,
        features: &DataFrame,
        target: &Series,
        hyperparameters: Option<&Hyperparameters>,
    ) -> Result<TrainOutcome> {
        validate_name("Model", name)?;
        let existing = self
            .metadata
            .get(name)
            .ok_or_else(|| ServiceError::not_found(format!("Model '{}'", name)))?;
        tracing::info!(model = %name, model_type = %existing.model_type, "Retraining model");

        let effective = hyperparameters.unwrap_or(&existing.hyperparameters);
        self.train(&existing.model_type, name, features, target, Some(effective))
    }

    /// One label per row of `rows`, in the caller's original label type.
    pub fn predict(&self, name: &str, rows: &DataFrame) -> Result<Vec<ClassLabel>> {
        let unit = self.artifacts.load(name)?;
        if !unit.is_trained() {
            return Err(ServiceError::internal(format!("Model '{}' is not trained", name)));
        }
        let predictions = unit.predict(rows)?;
        tracing::debug!(model = %name, rows = predictions.len(), "Prediction served");
        Ok(predictions)
    }

    /// Metadata records sorted by name
    pub fn list(&self) -> Vec<ModelRecord> {
        self.metadata.list()
    }

    /// Remove the artifact, then the record. A record left without an
    /// artifact is still removed.
    pub fn delete(&self, name: &str) -> Result<()> {
        let had_artifact = match self.artifacts.delete(name) {
            Ok(()) => true,
            Err(ServiceError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        let had_record = self.metadata.remove(name)?;
        if !had_artifact && !had_record {
            return Err(ServiceError::not_found(format!("Model '{}'", name)));
        }
        if !had_artifact {
            tracing::warn!(model = %name, "Removed metadata record that had no artifact");
        }
        tracing::info!(model = %name, "Model deleted");
        Ok(())
    }

    /// Download the registered weights of `name` from the tracking backend.
    pub fn fetch_remote(&self, name: &str) -> Result<std::path::PathBuf> {
        validate_name("Model", name)?;
        self.tracker
            .fetch_artifact(name)
            .ok_or_else(|| ServiceError::not_found(format!("Remote artifact for model '{}'", name)))
    }

    fn open_run(&self, name: &str, unit: &TrainedUnit) -> Option<String> {
        if !self.tracker.enabled() {
            return None;
        }
        let run_name = format!("{}_{}", name, Local::now().format("%Y%m%d_%H%M%S"));
        let run = self
            .tracker
            .create_run(&run_name, unit.model_type(), unit.hyperparameters());
        if run.is_none() {
            tracing::warn!(model = %name, "Tracking run unavailable, continuing without it");
        }
        run
    }

    fn publish_run(
        &self,
        run: &str,
        name: &str,
        unit: &TrainedUnit,
        metrics: &ClassificationMetrics,
        path: &std::path::Path,
    ) {
        let metric_map = metrics.to_map();
        self.tracker.log_metrics(run, &metric_map, None);
        self.tracker.log_progress(
            run,
            &format!(
                "Training finished. Metrics: {}",
                serde_json::to_string(&metric_map).unwrap_or_default()
            ),
            None,
        );

        let metadata: BTreeMap<String, Value> = [
            ("model_name".to_string(), json!(name)),
            ("model_type".to_string(), json!(unit.model_type())),
            ("metrics".to_string(), json!(metric_map)),
            ("hyperparameters".to_string(), json!(unit.hyperparameters())),
        ]
        .into_iter()
        .collect();
        match self.tracker.upload_artifact(run, path, name, &metadata) {
            Some(model_id) => tracing::info!(model = %name, model_id = %model_id, "Artifact registered remotely"),
            None => tracing::warn!(model = %name, "Artifact was not registered remotely"),
        }
        self.tracker.close_run(run);
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("models_dir", &self.artifacts.dir())
            .field("tracking", &self.tracker.enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize) -> (DataFrame, Series) {
        let a: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..n).map(|i| ((i * 3) % 7) as f64).collect();
        let y: Vec<&str> = (0..n).map(|i| if i < n / 2 { "neg" } else { "pos" }).collect();
        let df = DataFrame::new(vec![Series::new("a".into(), a), Series::new("b".into(), b)]).unwrap();
        (df, Series::new("y".into(), y))
    }

    #[test]
    fn test_train_writes_artifact_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::local(dir.path()).unwrap();
        let (df, y) = data(40);

        let outcome = orchestrator.train("DecisionTree", "tree", &df, &y, None).unwrap();
        assert!(outcome.tracking_id.is_none());
        assert!(orchestrator.artifacts().exists("tree").unwrap());
        let record = orchestrator.record("tree").unwrap();
        assert_eq!(record.model_type, "DecisionTree");
        assert_eq!(record.metrics.len(), 4);
    }

    #[test]
    fn test_unknown_type_leaves_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::local(dir.path()).unwrap();
        let (df, y) = data(20);
        assert!(matches!(
            orchestrator.train("SVM", "m", &df, &y, None),
            Err(ServiceError::UnknownCapability(_))
        ));
        assert!(orchestrator.list().is_empty());
        assert!(!orchestrator.artifacts().exists("m").unwrap());
    }

    #[test]
    fn test_delete_record_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::local(dir.path()).unwrap();
        let (df, y) = data(20);
        orchestrator.train("DecisionTree", "m", &df, &y, None).unwrap();
        std::fs::remove_file(dir.path().join("m.model")).unwrap();

        orchestrator.delete("m").unwrap();
        assert!(orchestrator.record("m").is_none());
        assert!(matches!(orchestrator.delete("m"), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_fetch_remote_without_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::local(dir.path()).unwrap();
        assert!(matches!(orchestrator.fetch_remote("m"), Err(ServiceError::NotFound(_))));
    }
}
