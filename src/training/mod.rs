//! Model training module
//!
//! Provides the trainable model types behind the capability registry:
//! - Logistic regression (multinomial, L-BFGS or gradient descent)
//! - Decision trees and Random Forests
//!
//! plus the shared pieces around them: hyperparameter merging, the seeded
//! train/test split, label encoding and classification metrics.

mod capability;
mod hyperparams;
mod labels;
mod models;
mod split;
mod unit;
pub mod decision_tree;
pub mod logistic_regression;
pub mod random_forest;

pub use capability::{
    CapabilityRegistry, DecisionTreeCapability, LogisticRegressionCapability, ModelCapability,
    ModelTypeInfo, RandomForestCapability,
};
pub use hyperparams::{merge as merge_hyperparameters, parse_json as parse_hyperparameters, Hyperparameters, Params};
pub use labels::{encode as encode_labels, labels_from_series, ClassLabel};
pub use models::{ClassificationMetrics, Classifier, NoopObserver, TrainingObserver};
pub use split::{train_test_split, SPLIT_SEED, TEST_FRACTION};
pub use unit::{Estimator, TrainedUnit};
pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use logistic_regression::{LogisticRegression, Solver};
pub use random_forest::{MaxFeatures, RandomForest};
