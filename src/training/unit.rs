//! Trainable/predictable unit produced by a capability

use ndarray::{Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::tabular::{column_names, columns_to_array2};
use super::decision_tree::DecisionTree;
use super::hyperparams::Hyperparameters;
use super::labels::{encode, labels_from_series, ClassLabel};
use super::logistic_regression::LogisticRegression;
use super::models::{ClassificationMetrics, Classifier, TrainingObserver};
use super::random_forest::RandomForest;
use super::split::{train_test_split, SPLIT_SEED, TEST_FRACTION};

/// The fitted estimator behind a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model")]
pub enum Estimator {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
    DecisionTree(DecisionTree),
}

impl Estimator {
    fn as_classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Estimator::LogisticRegression(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::DecisionTree(m) => m,
        }
    }

    fn as_classifier(&self) -> &dyn Classifier {
        match self {
            Estimator::LogisticRegression(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::DecisionTree(m) => m,
        }
    }
}

/// An estimator plus everything needed to map caller data onto it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedUnit {
    model_type: String,
    hyperparameters: Hyperparameters,
    estimator: Estimator,
    /// Feature columns seen at fit time, in matrix order
    feature_names: Vec<String>,
    /// Distinct target values seen at fit time, sorted
    classes: Vec<ClassLabel>,
    trained: bool,
}

impl TrainedUnit {
    pub fn new(model_type: impl Into<String>, hyperparameters: Hyperparameters, estimator: Estimator) -> Self {
        Self {
            model_type: model_type.into(),
            hyperparameters,
            estimator,
            feature_names: Vec::new(),
            classes: Vec::new(),
            trained: false,
        }
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    /// Effective hyperparameters (defaults merged with overrides)
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Split 80/20 with a fixed seed, fit on the train part and score the
    /// test part.
    pub fn train(
        &mut self,
        features: &DataFrame,
        target: &Series,
        observer: &dyn TrainingObserver,
    ) -> Result<ClassificationMetrics> {
        observer.progress(
            &format!(
                "Initializing {} with hyperparameters: {}",
                self.model_type,
                serde_json::to_string(&self.hyperparameters)?
            ),
            None,
        );

        let feature_names = column_names(features);
        if feature_names.is_empty() {
            return Err(ServiceError::invalid("No feature columns to train on"));
        }
        if features.height() != target.len() {
            return Err(ServiceError::invalid(format!(
                "Feature rows ({}) and target length ({}) differ",
                features.height(),
                target.len()
            )));
        }

        let x = columns_to_array2(features, &feature_names)?;
        let labels = labels_from_series(target)?;
        let (classes, y) = encode(&labels);

        let (train_idx, test_idx) = train_test_split(x.nrows(), TEST_FRACTION, SPLIT_SEED)?;
        observer.progress(
            &format!(
                "Data split: train={} samples, test={} samples",
                train_idx.len(),
                test_idx.len()
            ),
            None,
        );

        let x_train: Array2<f64> = x.select(Axis(0), &train_idx);
        let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
        let x_test: Array2<f64> = x.select(Axis(0), &test_idx);
        let y_test: Vec<usize> = test_idx.iter().map(|&i| y[i]).collect();

        self.estimator
            .as_classifier_mut()
            .fit(&x_train, &y_train, classes.len(), observer)?;
        self.feature_names = feature_names;
        self.classes = classes;
        self.trained = true;

        observer.progress("Training complete. Computing metrics on the test set...", None);
        let y_pred = self.estimator.as_classifier().predict(&x_test)?;
        let metrics = ClassificationMetrics::compute(&y_test, &y_pred, self.classes.len());

        tracing::info!(
            model_type = %self.model_type,
            accuracy = metrics.accuracy,
            f1 = metrics.f1,
            "Training finished"
        );
        Ok(metrics)
    }

    /// Predict one label per row. Columns are matched by name, order is free.
    pub fn predict(&self, features: &DataFrame) -> Result<Vec<ClassLabel>> {
        if !self.trained {
            return Err(ServiceError::internal(format!(
                "{} model has not been trained",
                self.model_type
            )));
        }

        let supplied = column_names(features);
        let missing: Vec<&str> = self
            .feature_names
            .iter()
            .filter(|f| !supplied.contains(f))
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::invalid(format!(
                "Missing feature columns: {}",
                missing.join(", ")
            )));
        }
        let unexpected: Vec<&str> = supplied
            .iter()
            .filter(|c| !self.feature_names.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !unexpected.is_empty() {
            return Err(ServiceError::invalid(format!(
                "Feature names unseen at fit time: {}",
                unexpected.join(", ")
            )));
        }

        let x = columns_to_array2(features, &self.feature_names)?;
        let encoded = self.estimator.as_classifier().predict(&x)?;
        encoded
            .into_iter()
            .map(|i| {
                self.classes
                    .get(i)
                    .cloned()
                    .ok_or_else(|| ServiceError::internal(format!("Predicted class index {} out of range", i)))
            })
            .collect()
    }
}
