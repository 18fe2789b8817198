//! Registry of trainable model types

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Result, ServiceError};
use super::decision_tree::{Criterion, DecisionTree};
use super::hyperparams::{merge, Hyperparameters, Params};
use super::logistic_regression::{LogisticRegression, Solver};
use super::random_forest::{MaxFeatures, RandomForest};
use super::unit::{Estimator, TrainedUnit};

/// An algorithm that can be trained by name
pub trait ModelCapability: Send + Sync {
    /// Registry key, also stored as the model's `type`
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn describe(&self) -> &'static str;

    /// Every accepted hyperparameter with its default value
    fn default_hyperparameters(&self) -> Hyperparameters;

    /// Build an untrained estimator from a fully merged map
    fn build(&self, hyperparameters: &Hyperparameters) -> Result<Estimator>;
}

/// Listing entry for a registered type
#[derive(Debug, Clone, Serialize)]
pub struct ModelTypeInfo {
    pub name: String,
    pub description: String,
    pub default_hyperparameters: Hyperparameters,
}

fn hyperparameters(pairs: &[(&str, Value)]) -> Hyperparameters {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn criterion(params: &Params<'_>) -> Result<Criterion> {
    let name = params.choice("criterion", &["gini", "entropy", "log_loss"])?;
    Criterion::parse(name).ok_or_else(|| ServiceError::invalid(format!("Unknown criterion '{}'", name)))
}

pub struct LogisticRegressionCapability;

impl ModelCapability for LogisticRegressionCapability {
    fn name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn describe(&self) -> &'static str {
        "Logistic regression for classification"
    }

    fn default_hyperparameters(&self) -> Hyperparameters {
        hyperparameters(&[
            ("C", json!(1.0)),
            ("max_iter", json!(100)),
            ("solver", json!("lbfgs")),
            ("tol", json!(0.0001)),
            ("learning_rate", json!(0.5)),
            ("random_state", json!(42)),
        ])
    }

    fn build(&self, hyperparameters: &Hyperparameters) -> Result<Estimator> {
        let p = Params::new(hyperparameters);
        let solver_name = p.choice("solver", &["lbfgs", "gd"])?;
        let solver = Solver::parse(solver_name)
            .ok_or_else(|| ServiceError::invalid(format!("Unknown solver '{}'", solver_name)))?;
        // Validated only: both solvers are deterministic.
        p.seed("random_state", 42)?;

        Ok(Estimator::LogisticRegression(
            LogisticRegression::new()
                .with_c(p.positive_f64("C")?)
                .with_max_iter(p.usize_at_least("max_iter", 1)?)
                .with_tol(p.positive_f64("tol")?)
                .with_learning_rate(p.positive_f64("learning_rate")?)
                .with_solver(solver),
        ))
    }
}

pub struct RandomForestCapability;

impl ModelCapability for RandomForestCapability {
    fn name(&self) -> &'static str {
        "RandomForest"
    }

    fn describe(&self) -> &'static str {
        "Random Forest classifier - ensemble of decision trees"
    }

    fn default_hyperparameters(&self) -> Hyperparameters {
        hyperparameters(&[
            ("n_estimators", json!(100)),
            ("max_depth", Value::Null),
            ("min_samples_split", json!(2)),
            ("min_samples_leaf", json!(1)),
            ("max_features", json!("sqrt")),
            ("criterion", json!("gini")),
            ("bootstrap", json!(true)),
            ("random_state", json!(42)),
        ])
    }

    fn build(&self, hyperparameters: &Hyperparameters) -> Result<Estimator> {
        let p = Params::new(hyperparameters);
        let max_features = MaxFeatures::from_value(p.raw("max_features")).ok_or_else(|| {
            ServiceError::invalid(format!(
                "Hyperparameter 'max_features' must be \"sqrt\", \"log2\", null, a positive integer or a fraction in (0, 1], got {}",
                p.raw("max_features")
            ))
        })?;

        Ok(Estimator::RandomForest(
            RandomForest::new(p.usize_at_least("n_estimators", 1)?)
                .with_max_depth(p.opt_usize("max_depth")?)
                .with_min_samples_split(p.usize_at_least("min_samples_split", 2)?)
                .with_min_samples_leaf(p.usize_at_least("min_samples_leaf", 1)?)
                .with_max_features(max_features)
                .with_criterion(criterion(&p)?)
                .with_bootstrap(p.bool("bootstrap")?)
                .with_random_state(p.seed("random_state", 42)?),
        ))
    }
}

pub struct DecisionTreeCapability;

impl ModelCapability for DecisionTreeCapability {
    fn name(&self) -> &'static str {
        "DecisionTree"
    }

    fn describe(&self) -> &'static str {
        "Decision tree classifier - single CART tree"
    }

    fn default_hyperparameters(&self) -> Hyperparameters {
        hyperparameters(&[
            ("max_depth", Value::Null),
            ("min_samples_split", json!(2)),
            ("min_samples_leaf", json!(1)),
            ("max_features", Value::Null),
            ("criterion", json!("gini")),
            ("random_state", json!(42)),
        ])
    }

    fn build(&self, hyperparameters: &Hyperparameters) -> Result<Estimator> {
        let p = Params::new(hyperparameters);
        Ok(Estimator::DecisionTree(
            DecisionTree::new()
                .with_max_depth(p.opt_usize("max_depth")?)
                .with_min_samples_split(p.usize_at_least("min_samples_split", 2)?)
                .with_min_samples_leaf(p.usize_at_least("min_samples_leaf", 1)?)
                .with_max_features(p.opt_usize("max_features")?)
                .with_criterion(criterion(&p)?)
                .with_random_state(p.seed("random_state", 42)?),
        ))
    }
}

/// Fixed mapping from type name to capability
#[derive(Clone)]
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn ModelCapability>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CapabilityRegistry {
    /// The built-in classifiers
    pub fn builtin() -> Self {
        Self {
            capabilities: vec![
                Arc::new(LogisticRegressionCapability),
                Arc::new(RandomForestCapability),
                Arc::new(DecisionTreeCapability),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ModelCapability>> {
        self.capabilities
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| {
                let known: Vec<&str> = self.capabilities.iter().map(|c| c.name()).collect();
                ServiceError::UnknownCapability(format!(
                    "'{}' (available: {})",
                    name,
                    known.join(", ")
                ))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name() == name)
    }

    /// Resolve `name`, merge `overrides` over its defaults and build an untrained unit.
    pub fn create_unit(&self, name: &str, overrides: Option<&Hyperparameters>) -> Result<TrainedUnit> {
        let capability = self.get(name)?;
        let effective = merge(&capability.default_hyperparameters(), overrides)?;
        let estimator = capability.build(&effective)?;
        Ok(TrainedUnit::new(capability.name(), effective, estimator))
    }

    pub fn types(&self) -> Vec<ModelTypeInfo> {
        self.capabilities
            .iter()
            .map(|c| ModelTypeInfo {
                name: c.name().to_string(),
                description: c.describe().to_string(),
                default_hyperparameters: c.default_hyperparameters(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let registry = CapabilityRegistry::builtin();
        let names: Vec<String> = registry.types().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["LogisticRegression", "RandomForest", "DecisionTree"]);
    }

    #[test]
    fn test_unknown_type() {
        let registry = CapabilityRegistry::builtin();
        assert!(matches!(registry.get("SVM"), Err(ServiceError::UnknownCapability(_))));
        assert!(matches!(registry.create_unit("SVM", None), Err(ServiceError::UnknownCapability(_))));
    }

    #[test]
    fn test_defaults_build_for_every_type() {
        let registry = CapabilityRegistry::builtin();
        for info in registry.types() {
            let unit = registry.create_unit(&info.name, None).unwrap();
            assert_eq!(unit.hyperparameters(), &info.default_hyperparameters);
            assert!(!unit.is_trained());
        }
    }

    #[test]
    fn test_overrides_are_validated() {
        let registry = CapabilityRegistry::builtin();
        let mut bad = Hyperparameters::new();
        bad.insert("n_estimators".into(), json!(0));
        assert!(matches!(
            registry.create_unit("RandomForest", Some(&bad)),
            Err(ServiceError::InvalidInput(_))
        ));

        let mut ok = Hyperparameters::new();
        ok.insert("n_estimators".into(), json!(10));
        let unit = registry.create_unit("RandomForest", Some(&ok)).unwrap();
        assert_eq!(unit.hyperparameters()["n_estimators"], json!(10));
        assert_eq!(unit.hyperparameters()["random_state"], json!(42));
    }

    #[test]
    fn test_random_forest_description() {
        let registry = CapabilityRegistry::builtin();
        let rf = registry.get("RandomForest").unwrap();
        assert_eq!(rf.describe(), "Random Forest classifier - ensemble of decision trees");
    }
}
