//! Decision tree classifier

use crate::error::{Result, ServiceError};
use super::models::{argmax_count, Classifier, TrainingObserver};
use ndarray::Array2;
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node. Children are indices into the tree's node arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node predicting an encoded class
    Leaf {
        class: usize,
        n_samples: usize,
    },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: usize,
        right: usize,
        n_samples: usize,
        impurity: f64,
    },
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Criterion {
    /// Gini impurity
    Gini,
    /// Shannon entropy
    Entropy,
}

impl Criterion {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gini" => Some(Criterion::Gini),
            "entropy" | "log_loss" => Some(Criterion::Entropy),
            _ => None,
        }
    }

    fn impurity(&self, counts: &[usize], total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let n = total as f64;
        match self {
            Criterion::Gini => {
                1.0 - counts
                    .iter()
                    .map(|&c| (c as f64 / n).powi(2))
                    .sum::<f64>()
            }
            Criterion::Entropy => -counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / n;
                    p * p.ln()
                })
                .sum::<f64>(),
        }
    }
}

/// Node waiting to be grown, filling arena slot `slot`
struct PendingNode {
    slot: usize,
    indices: Vec<usize>,
    depth: usize,
}

/// Best split found for one node
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Node arena, root at index 0; empty until fitted
    nodes: Vec<TreeNode>,
    /// Maximum depth
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features drawn at random for each split (all when `None`)
    pub max_features: Option<usize>,
    /// Impurity criterion
    pub criterion: Criterion,
    /// Seed for feature sampling
    pub random_state: u64,
    /// Number of features
    n_features: usize,
    /// Number of classes
    n_classes: usize,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
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
        self.min_samples_split = min_samples.max(2);
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    /// Set criterion
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit on row subset `indices` of `x`. Rows may repeat (bootstrap samples).
    pub fn fit_indices(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, indices: &[usize]) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(ServiceError::invalid(format!(
                "Feature rows ({}) and target length ({}) differ",
                x.nrows(),
                y.len()
            )));
        }
        if indices.is_empty() {
            return Err(ServiceError::invalid("Cannot fit a tree on zero rows"));
        }

        self.n_features = x.ncols();
        self.n_classes = n_classes;

        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        self.nodes = self.build_tree(x, y, indices, &mut rng);
        Ok(())
    }

    fn class_counts(&self, y: &[usize], indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &i in indices {
            counts[y[i]] += 1;
        }
        counts
    }

    /// Grow the tree depth first with an explicit work stack. The left child
    /// is always grown before the right one so feature sampling draws from
    /// the rng in a fixed order.
    fn build_tree(&self, x: &Array2<f64>, y: &[usize], indices: &[usize], rng: &mut ChaCha8Rng) -> Vec<TreeNode> {
        let mut nodes = vec![TreeNode::Leaf { class: 0, n_samples: 0 }];
        let mut stack = vec![PendingNode { slot: 0, indices: indices.to_vec(), depth: 0 }];

        while let Some(PendingNode { slot, indices, depth }) = stack.pop() {
            let n_samples = indices.len();
            let counts = self.class_counts(y, &indices);
            let leaf = TreeNode::Leaf { class: argmax_count(&counts), n_samples };

            // Check stopping conditions
            let is_pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
            let should_stop = n_samples < self.min_samples_split
                || n_samples < 2 * self.min_samples_leaf
                || self.max_depth.map_or(false, |d| depth >= d)
                || is_pure;

            if should_stop {
                nodes[slot] = leaf;
                continue;
            }

            let impurity = self.criterion.impurity(&counts, n_samples);
            let candidates = self.sample_features(rng);

            let Some(best) = self.find_best_split(x, y, &indices, &candidates, impurity) else {
                nodes[slot] = leaf;
                continue;
            };

            let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| x[[i, best.feature_idx]] <= best.threshold);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(TreeNode::Leaf { class: 0, n_samples: 0 });
            nodes.push(TreeNode::Leaf { class: 0, n_samples: 0 });
            nodes[slot] = TreeNode::Split {
                feature_idx: best.feature_idx,
                threshold: best.threshold,
                left,
                right,
                n_samples,
                impurity,
            };

            stack.push(PendingNode { slot: right, indices: right_indices, depth: depth + 1 });
            stack.push(PendingNode { slot: left, indices: left_indices, depth: depth + 1 });
        }

        nodes
    }

    fn sample_features(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        let k = self.max_features.unwrap_or(self.n_features).clamp(1, self.n_features.max(1));
        if k >= self.n_features {
            return (0..self.n_features).collect();
        }
        let mut features = sample(rng, self.n_features, k).into_vec();
        features.sort_unstable();
        features
    }

    /// Sort each candidate feature once and sweep thresholds left to right,
    /// moving one sample at a time from the right counts to the left counts.
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        indices: &[usize],
        features: &[usize],
        parent_impurity: f64,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let total_counts = self.class_counts(y, indices);

        let per_feature: Vec<Option<SplitCandidate>> = features
            .par_iter()
            .map(|&feature_idx| {
                let mut column: Vec<(f64, usize)> = indices
                    .iter()
                    .map(|&i| (x[[i, feature_idx]], y[i]))
                    .collect();
                column.sort_by(|a, b| a.0.total_cmp(&b.0));

                let mut left = vec![0usize; self.n_classes];
                let mut right = total_counts.clone();
                let mut best: Option<SplitCandidate> = None;

                for pos in 0..n - 1 {
                    let (value, class) = column[pos];
                    left[class] += 1;
                    right[class] -= 1;

                    let next = column[pos + 1].0;
                    if next <= value {
                        continue;
                    }
                    let n_left = pos + 1;
                    let n_right = n - n_left;
                    if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                        continue;
                    }

                    let weighted = (n_left as f64 * self.criterion.impurity(&left, n_left)
                        + n_right as f64 * self.criterion.impurity(&right, n_right))
                        / n as f64;
                    let gain = parent_impurity - weighted;

                    if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                        let mut threshold = (value + next) / 2.0;
                        if threshold >= next {
                            threshold = value;
                        }
                        best = Some(SplitCandidate { feature_idx, threshold, gain });
                    }
                }
                best
            })
            .collect();

        // First feature wins ties so results do not depend on scheduling
        per_feature.into_iter().flatten().fold(None, |acc: Option<SplitCandidate>, cand| match acc {
            Some(a) if a.gain >= cand.gain => Some(a),
            _ => Some(cand),
        })
    }

    /// Walk from the root to a leaf. Children always sit after their parent
    /// in the arena, which bounds the walk even for a corrupted artifact.
    fn predict_sample(&self, x: &Array2<f64>, row: usize) -> Result<usize> {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { class, .. }) => return Ok(*class),
                Some(TreeNode::Split { feature_idx, threshold, left, right, .. }) => {
                    let next = if x[[row, *feature_idx]] <= *threshold { *left } else { *right };
                    if next <= idx {
                        break;
                    }
                    idx = next;
                }
                None => break,
            }
        }
        Err(ServiceError::internal("Decision tree node links are corrupt"))
    }

    /// Predict one encoded class per row
    pub fn predict_rows(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        if self.nodes.is_empty() {
            return Err(ServiceError::internal("Decision tree has not been fitted"));
        }
        if x.ncols() != self.n_features {
            return Err(ServiceError::invalid(format!(
                "Expected {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        (0..x.nrows()).map(|row| self.predict_sample(x, row)).collect()
    }

    /// Get tree depth
    pub fn get_depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((idx, depth)) = stack.pop() {
            match self.nodes.get(idx) {
                Some(TreeNode::Split { left, right, .. }) if *left > idx && *right > idx => {
                    stack.push((*left, depth + 1));
                    stack.push((*right, depth + 1));
                }
                Some(_) => deepest = deepest.max(depth),
                None => {}
            }
        }
        deepest
    }
}

impl Classifier for DecisionTree {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        observer: &dyn TrainingObserver,
    ) -> Result<()> {
        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.fit_indices(x, y, n_classes, &indices)?;
        observer.progress(&format!("Grown tree of depth {}", self.get_depth()), None);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        self.predict_rows(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::NoopObserver;
    use ndarray::array;

    #[test]
    fn test_classifier_simple() {
        let x = array![
            [0.0, 0.0],
            [0.0, 1.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [5.0, 5.0],
            [5.0, 6.0],
            [6.0, 5.0],
            [6.0, 6.0],
        ];
        let y = vec![0, 0, 0, 0, 1, 1, 1, 1];

        let mut tree = DecisionTree::new();
        tree.fit(&x, &y, 2, &NoopObserver).unwrap();

        assert_eq!(tree.predict(&x).unwrap(), y);
        assert_eq!(tree.get_depth(), 2);
    }

    #[test]
    fn test_max_depth_limits_tree() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = vec![0, 1, 0, 1, 0, 1];

        let mut tree = DecisionTree::new().with_max_depth(Some(1));
        tree.fit(&x, &y, 2, &NoopObserver).unwrap();
        assert!(tree.get_depth() <= 2);
    }

    #[test]
    fn test_entropy_criterion() {
        let x = array![[1.0, 9.0], [2.0, 8.0], [8.0, 2.0], [9.0, 1.0]];
        let y = vec![1, 1, 0, 0];

        let mut tree = DecisionTree::new().with_criterion(Criterion::Entropy);
        tree.fit(&x, &y, 2, &NoopObserver).unwrap();
        assert_eq!(tree.predict(&array![[1.5, 8.5], [8.5, 1.5]]).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_constant_features_give_majority_leaf() {
        let x = array![[1.0], [1.0], [1.0]];
        let y = vec![2, 2, 0];
        let mut tree = DecisionTree::new();
        tree.fit(&x, &y, 3, &NoopObserver).unwrap();
        assert_eq!(tree.predict(&array![[1.0]]).unwrap(), vec![2]);
    }

    #[test]
    fn test_deep_alternating_tree_runs_on_small_stack() {
        // Alternating labels on one feature peel off one row per level
        let n = 3000;
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || {
                let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
                let y: Vec<usize> = (0..n).map(|i| i % 2).collect();

                let mut tree = DecisionTree::new();
                tree.fit(&x, &y, 2, &NoopObserver).unwrap();
                assert!(tree.get_depth() > n / 2);
                assert_eq!(tree.predict(&x).unwrap(), y);

                let json = serde_json::to_string(&tree).unwrap();
                let restored: DecisionTree = serde_json::from_str(&json).unwrap();
                assert_eq!(restored.get_depth(), tree.get_depth());
                assert_eq!(restored.predict(&x).unwrap(), y);
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_corrupt_links_are_rejected() {
        let mut tree = DecisionTree::new();
        tree.fit(&array![[0.0], [1.0]], &[0, 1], 2, &NoopObserver).unwrap();
        if let Some(TreeNode::Split { left, .. }) = tree.nodes.first_mut() {
            *left = 0;
        }
        assert!(tree.predict(&array![[0.0]]).is_err());
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let tree = DecisionTree::new();
        assert!(tree.predict(&array![[1.0]]).is_err());
    }
}
