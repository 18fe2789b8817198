//! Random Forest classifier

use crate::error::{Result, ServiceError};
use super::decision_tree::{Criterion, DecisionTree};
use super::models::{argmax_count, Classifier, TrainingObserver};
use ndarray::Array2;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Progress is reported after each of this many equal batches of trees
const PROGRESS_BATCHES: usize = 10;

/// Random Forest model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    /// Individual trees
    trees: Vec<DecisionTree>,
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features considered per split
    pub max_features: MaxFeatures,
    /// Bootstrap sampling
    pub bootstrap: bool,
    /// Impurity criterion
    pub criterion: Criterion,
    /// Random state
    pub random_state: u64,
    /// Number of features
    n_features: usize,
    /// Number of classes
    n_classes: usize,
}

/// Strategy for max features
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// Log2 of n_features
    Log2,
    /// Fraction of n_features
    Fraction(f64),
    /// Fixed number
    Fixed(usize),
    /// All features
    All,
}

impl MaxFeatures {
    /// Read from a hyperparameter value: `"sqrt"`, `"log2"`, `null` (all),
    /// an integer count or a fraction in (0, 1].
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(MaxFeatures::All),
            serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "sqrt" | "auto" => Some(MaxFeatures::Sqrt),
                "log2" => Some(MaxFeatures::Log2),
                "all" | "none" => Some(MaxFeatures::All),
                _ => None,
            },
            serde_json::Value::Number(n) => {
                if let Some(count) = n.as_u64() {
                    (count > 0).then_some(MaxFeatures::Fixed(count as usize))
                } else {
                    n.as_f64()
                        .filter(|f| *f > 0.0 && *f <= 1.0)
                        .map(MaxFeatures::Fraction)
                }
            }
            _ => None,
        }
    }

    pub fn resolve(&self, n_features: usize) -> usize {
        match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).floor() as usize,
            MaxFeatures::Fixed(n) => (*n).min(n_features),
            MaxFeatures::All => n_features,
        }
        .max(1)
    }
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForest {
    /// Create a new classifier forest
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            criterion: Criterion::Gini,
            random_state: 42,
            n_features: 0,
            n_classes: 0,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    /// Set max features strategy
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    fn grow_tree(&self, x: &Array2<f64>, y: &[usize], seed: u64, max_features: usize) -> Result<DecisionTree> {
        let n_samples = x.nrows();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let sample_indices: Vec<usize> = if self.bootstrap {
            (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
        } else {
            (0..n_samples).collect()
        };

        let mut tree = DecisionTree::new()
            .with_max_depth(self.max_depth)
            .with_min_samples_split(self.min_samples_split)
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_criterion(self.criterion)
            .with_max_features(Some(max_features))
            .with_random_state(rng.next_u64());
        tree.fit_indices(x, y, self.n_classes, &sample_indices)?;
        Ok(tree)
    }

    /// Number of fitted trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        observer: &dyn TrainingObserver,
    ) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(ServiceError::invalid(format!(
                "Feature rows ({}) and target length ({}) differ",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(ServiceError::invalid("Cannot fit a forest on zero rows"));
        }

        self.n_features = x.ncols();
        self.n_classes = n_classes;
        let max_features = self.max_features.resolve(self.n_features);

        // Per-tree seeds are drawn up front so the forest does not depend on scheduling
        let mut seeder = ChaCha8Rng::seed_from_u64(self.random_state);
        let seeds: Vec<u64> = (0..self.n_estimators).map(|_| seeder.next_u64()).collect();

        observer.progress(
            &format!("Starting RandomForest training ({} trees)...", self.n_estimators),
            Some(0),
        );

        let batch_size = self.n_estimators.div_ceil(PROGRESS_BATCHES).max(1);
        let mut trees = Vec::with_capacity(self.n_estimators);
        for batch in seeds.chunks(batch_size) {
            let grown: Vec<DecisionTree> = batch
                .par_iter()
                .map(|&seed| self.grow_tree(x, y, seed, max_features))
                .collect::<Result<Vec<_>>>()?;
            trees.extend(grown);

            if trees.len() < self.n_estimators {
                let progress = trees.len() as f64 / self.n_estimators as f64 * 100.0;
                observer.progress(
                    &format!(
                        "Training progress: {:.0}% ({}/{} trees)",
                        progress,
                        trees.len(),
                        self.n_estimators
                    ),
                    Some(trees.len() as u64),
                );
            }
        }

        self.trees = trees;
        Ok(())
    }

    /// Majority vote across trees; ties go to the lowest class index.
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        if self.trees.is_empty() {
            return Err(ServiceError::internal("Random forest has not been fitted"));
        }

        let all_predictions: Vec<Vec<usize>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict_rows(x))
            .collect::<Result<Vec<_>>>()?;

        let predictions = (0..x.nrows())
            .map(|i| {
                let mut votes = vec![0usize; self.n_classes.max(1)];
                for preds in &all_predictions {
                    votes[preds[i]] += 1;
                }
                argmax_count(&votes)
            })
            .collect();

        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::NoopObserver;
    use ndarray::array;
    use parking_lot::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl TrainingObserver for Recorder {
        fn progress(&self, message: &str, _iteration: Option<u64>) {
            self.0.lock().push(message.to_string());
        }
    }

    fn separable() -> (Array2<f64>, Vec<usize>) {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.2],
            [0.3, 0.1],
            [1.0, 1.0],
            [1.1, 1.1],
            [1.2, 1.2],
            [1.3, 1.1],
        ];
        (x, vec![0, 0, 0, 0, 1, 1, 1, 1])
    }

    #[test]
    fn test_classifier() {
        let (x, y) = separable();
        let mut rf = RandomForest::new(10).with_random_state(42);
        rf.fit(&x, &y, 2, &NoopObserver).unwrap();
        assert_eq!(rf.n_trees(), 10);

        let predictions = rf.predict(&x).unwrap();
        let accuracy = predictions.iter().zip(&y).filter(|(p, a)| p == a).count() as f64 / y.len() as f64;
        assert!(accuracy >= 0.8, "Accuracy too low: {}", accuracy);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = separable();
        let mut a = RandomForest::new(8).with_random_state(7);
        let mut b = RandomForest::new(8).with_random_state(7);
        a.fit(&x, &y, 2, &NoopObserver).unwrap();
        b.fit(&x, &y, 2, &NoopObserver).unwrap();
        let probe = array![[0.5, 0.5], [0.6, 0.4], [0.05, 1.2]];
        assert_eq!(a.predict(&probe).unwrap(), b.predict(&probe).unwrap());
    }

    #[test]
    fn test_progress_reported_in_tenths() {
        let (x, y) = separable();
        let recorder = Recorder(Mutex::new(Vec::new()));
        let mut rf = RandomForest::new(20);
        rf.fit(&x, &y, 2, &recorder).unwrap();
        let events = recorder.0.lock();
        assert!(events[0].starts_with("Starting RandomForest training (20 trees)"));
        // start event plus 9 intermediate batches
        assert_eq!(events.len(), 10);
    }

    #[test]
    fn test_max_features_parsing() {
        use serde_json::json;
        assert_eq!(MaxFeatures::from_value(&json!("sqrt")), Some(MaxFeatures::Sqrt));
        assert_eq!(MaxFeatures::from_value(&json!(null)), Some(MaxFeatures::All));
        assert_eq!(MaxFeatures::from_value(&json!(3)), Some(MaxFeatures::Fixed(3)));
        assert_eq!(MaxFeatures::from_value(&json!(0.5)), Some(MaxFeatures::Fraction(0.5)));
        assert_eq!(MaxFeatures::from_value(&json!("most")), None);
        assert_eq!(MaxFeatures::Sqrt.resolve(4), 2);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let rf = RandomForest::new(3);
        assert!(rf.predict(&array![[1.0, 2.0]]).is_err());
    }
}
