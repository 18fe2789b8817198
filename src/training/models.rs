//! Classifier trait, training observer and evaluation metrics

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Quality of a fitted classifier on held-out data.
///
/// Precision, recall and F1 are support-weighted averages over the classes;
/// a class with an empty denominator contributes 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassificationMetrics {
    /// Compute metrics from encoded labels in `0..n_classes`.
    pub fn compute(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Self {
        let n = y_true.len().min(y_pred.len());
        if n == 0 {
            return Self { accuracy: 0.0, precision: 0.0, recall: 0.0, f1: 0.0 };
        }

        let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
        let accuracy = correct as f64 / n as f64;

        let (tp, fp, fn_) = Self::confusion_counts(y_true, y_pred, n_classes);

        let mut precision = 0.0;
        let mut recall = 0.0;
        let mut f1 = 0.0;
        let mut total_support = 0usize;
        for c in 0..n_classes {
            let support = tp[c] + fn_[c];
            if support == 0 {
                continue;
            }
            let p = ratio(tp[c], tp[c] + fp[c]);
            let r = ratio(tp[c], support);
            let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
            precision += support as f64 * p;
            recall += support as f64 * r;
            f1 += support as f64 * f;
            total_support += support;
        }

        if total_support == 0 {
            return Self { accuracy, precision: 0.0, recall: 0.0, f1: 0.0 };
        }
        let w = total_support as f64;
        Self {
            accuracy,
            precision: precision / w,
            recall: recall / w,
            f1: f1 / w,
        }
    }

    /// Per-class true positives, false positives and false negatives
    fn confusion_counts(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
        let mut tp = vec![0; n_classes];
        let mut fp = vec![0; n_classes];
        let mut fn_ = vec![0; n_classes];

        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t >= n_classes || p >= n_classes {
                continue;
            }
            if t == p {
                tp[t] += 1;
            } else {
                fp[p] += 1;
                fn_[t] += 1;
            }
        }

        (tp, fp, fn_)
    }

    /// Metrics keyed the way they are persisted and reported.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("precision".to_string(), self.precision),
            ("recall".to_string(), self.recall),
            ("f1".to_string(), self.f1),
        ])
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Receives human-readable progress while a unit trains
pub trait TrainingObserver: Send + Sync {
    fn progress(&self, message: &str, iteration: Option<u64>);
}

/// Observer that drops every event
pub struct NoopObserver;

impl TrainingObserver for NoopObserver {
    fn progress(&self, _message: &str, _iteration: Option<u64>) {}
}

/// A classifier over dense features and labels encoded as `0..n_classes`
pub trait Classifier: Send + Sync {
    /// Fit to training data
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        observer: &dyn TrainingObserver,
    ) -> Result<()>;

    /// Predict encoded labels
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>>;
}

/// Index of the largest count; ties go to the lowest index.
pub(crate) fn argmax_count(counts: &[usize]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let y = vec![0, 1, 2, 1];
        let m = ClassificationMetrics::compute(&y, &y, 3);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1, 1.0);
    }

    #[test]
    fn test_weighted_average() {
        // class 0: support 3, class 1: support 1
        let y_true = vec![0, 0, 0, 1];
        let y_pred = vec![0, 0, 1, 1];
        let m = ClassificationMetrics::compute(&y_true, &y_pred, 2);
        assert!((m.accuracy - 0.75).abs() < 1e-12);
        // precision: c0 = 1.0, c1 = 0.5 -> (3*1.0 + 1*0.5)/4
        assert!((m.precision - 0.875).abs() < 1e-12);
        // recall: c0 = 2/3, c1 = 1.0 -> (3*2/3 + 1)/4
        assert!((m.recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_counts_as_zero() {
        // class 1 is never predicted
        let y_true = vec![0, 1];
        let y_pred = vec![0, 0];
        let m = ClassificationMetrics::compute(&y_true, &y_pred, 2);
        assert!((m.precision - 0.25).abs() < 1e-12);
        assert!(m.f1 >= 0.0 && m.f1 <= 1.0);
    }

    #[test]
    fn test_to_map_keys() {
        let m = ClassificationMetrics::compute(&[0], &[0], 1);
        let keys: Vec<String> = m.to_map().into_keys().collect();
        assert_eq!(keys, vec!["accuracy", "f1", "precision", "recall"]);
    }

    #[test]
    fn test_argmax_ties_lowest() {
        assert_eq!(argmax_count(&[2, 5, 5, 1]), 1);
        assert_eq!(argmax_count(&[0, 0]), 0);
    }
}
