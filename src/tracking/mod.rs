//! Experiment-tracking side-channel
//!
//! Nothing here may fail a training or prediction call: every method returns
//! an absent result (or nothing) when tracking is disabled or the backend
//! errors, after logging the cause.

mod clearml;

pub use clearml::ClearMlTracker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::training::{Hyperparameters, TrainingObserver};

/// Remote run and model registry
pub trait ExperimentTracker: Send + Sync {
    /// Decided once, at construction
    fn enabled(&self) -> bool;

    /// Open a training run, returning its id.
    fn create_run(&self, run_name: &str, model_type: &str, hyperparameters: &Hyperparameters) -> Option<String>;

    /// Scalars at `iteration`, or final single values when it is `None`.
    fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>, iteration: Option<u64>);

    fn log_progress(&self, run_id: &str, message: &str, iteration: Option<u64>);

    /// Register the artifact at `path` as a model, returning the model id.
    fn upload_artifact(
        &self,
        run_id: &str,
        path: &Path,
        model_name: &str,
        metadata: &BTreeMap<String, Value>,
    ) -> Option<String>;

    /// Download the latest registered weights for `model_name` to a local file.
    fn fetch_artifact(&self, model_name: &str) -> Option<PathBuf>;

    fn close_run(&self, run_id: &str);
}

/// Tracking switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTracker;

impl ExperimentTracker for DisabledTracker {
    fn enabled(&self) -> bool {
        false
    }

    fn create_run(&self, _run_name: &str, _model_type: &str, _hyperparameters: &Hyperparameters) -> Option<String> {
        None
    }

    fn log_metrics(&self, _run_id: &str, _metrics: &BTreeMap<String, f64>, _iteration: Option<u64>) {}

    fn log_progress(&self, _run_id: &str, _message: &str, _iteration: Option<u64>) {}

    fn upload_artifact(
        &self,
        _run_id: &str,
        _path: &Path,
        _model_name: &str,
        _metadata: &BTreeMap<String, Value>,
    ) -> Option<String> {
        None
    }

    fn fetch_artifact(&self, _model_name: &str) -> Option<PathBuf> {
        None
    }

    fn close_run(&self, _run_id: &str) {}
}

/// Forwards training progress into an open run
pub struct RunObserver<'a> {
    tracker: &'a dyn ExperimentTracker,
    run_id: &'a str,
}

impl<'a> RunObserver<'a> {
    pub fn new(tracker: &'a dyn ExperimentTracker, run_id: &'a str) -> Self {
        Self { tracker, run_id }
    }
}

impl TrainingObserver for RunObserver<'_> {
    fn progress(&self, message: &str, iteration: Option<u64>) {
        tracing::debug!(run = %self.run_id, ?iteration, "{}", message);
        self.tracker.log_progress(self.run_id, message, iteration);
    }
}
