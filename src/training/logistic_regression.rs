//! Multinomial logistic regression

use std::collections::VecDeque;

use crate::error::{Result, ServiceError};
use super::models::{Classifier, TrainingObserver};
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Optimizer used to minimise the penalised log-loss
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Solver {
    /// Limited-memory BFGS with backtracking line search
    Lbfgs,
    /// Fixed-step full-batch gradient descent
    GradientDescent,
}

impl Solver {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lbfgs" => Some(Solver::Lbfgs),
            "gd" | "gradient_descent" => Some(Solver::GradientDescent),
            _ => None,
        }
    }
}

/// Logistic regression over standardised features.
///
/// The objective is the mean softmax cross-entropy plus `||W||^2 / (2 C n)`;
/// intercepts are not penalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularisation strength
    pub c: f64,
    /// Maximum iterations
    pub max_iter: usize,
    /// Convergence tolerance on the gradient's max-norm
    pub tol: f64,
    /// Step size for gradient descent
    pub learning_rate: f64,
    pub solver: Solver,
    /// Coefficients, features x classes
    coefficients: Option<Array2<f64>>,
    /// Intercept per class
    intercepts: Option<Array1<f64>>,
    /// Feature means used for standardisation
    means: Option<Array1<f64>>,
    /// Feature scales used for standardisation
    scales: Option<Array1<f64>>,
    /// Iterations actually run by the last fit
    n_iter: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

/// Curvature pairs kept by L-BFGS
const HISTORY: usize = 10;

impl LogisticRegression {
    /// Create a new logistic regression model
    pub fn new() -> Self {
        Self {
            c: 1.0,
            max_iter: 100,
            tol: 1e-4,
            learning_rate: 0.5,
            solver: Solver::Lbfgs,
            coefficients: None,
            intercepts: None,
            means: None,
            scales: None,
            n_iter: 0,
        }
    }

    /// Set inverse regularisation strength
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn standardize(x: &Array2<f64>, means: &Array1<f64>, scales: &Array1<f64>) -> Array2<f64> {
        (x - &means.view().insert_axis(Axis(0))) / &scales.view().insert_axis(Axis(0))
    }

    /// Row-wise softmax, shifted by the row max for stability
    fn softmax(z: &mut Array2<f64>) {
        for mut row in z.rows_mut() {
            let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
    }

    /// Penalised loss and gradient at `theta` (flattened weights then intercepts)
    fn loss_and_grad(&self, theta: &Array1<f64>, x: &Array2<f64>, y_onehot: &Array2<f64>) -> Result<(f64, Array1<f64>)> {
        let (n, d) = x.dim();
        let k = y_onehot.ncols();
        let w = Array2::from_shape_vec((d, k), theta.slice(s![..d * k]).to_vec())?;
        let b = theta.slice(s![d * k..]);

        let mut p = x.dot(&w) + &b.insert_axis(Axis(0));
        Self::softmax(&mut p);

        let nf = n as f64;
        let penalty = 1.0 / (self.c * nf);
        let log_loss = -(&p.mapv(|v| v.max(1e-300).ln()) * y_onehot).sum() / nf;
        let loss = log_loss + 0.5 * penalty * w.mapv(|v| v * v).sum();

        let err = p - y_onehot;
        let grad_w = x.t().dot(&err) / nf + &w * penalty;
        let grad_b = err.sum_axis(Axis(0)) / nf;

        let mut grad = Array1::zeros(theta.len());
        grad.slice_mut(s![..d * k]).assign(&Array1::from_iter(grad_w.iter().copied()));
        grad.slice_mut(s![d * k..]).assign(&grad_b);
        Ok((loss, grad))
    }

    fn max_norm(v: &Array1<f64>) -> f64 {
        v.fold(0.0, |m: f64, &x| m.max(x.abs()))
    }

    fn minimize_lbfgs(&mut self, mut theta: Array1<f64>, x: &Array2<f64>, y: &Array2<f64>, observer: &dyn TrainingObserver) -> Result<Array1<f64>> {
        let (mut loss, mut grad) = self.loss_and_grad(&theta, x, y)?;
        let mut history: VecDeque<(Array1<f64>, Array1<f64>, f64)> = VecDeque::with_capacity(HISTORY);

        for iter in 0..self.max_iter {
            self.n_iter = iter + 1;
            if Self::max_norm(&grad) < self.tol {
                break;
            }

            // Two-loop recursion for the search direction
            let mut q = grad.clone();
            let mut alphas = Vec::with_capacity(history.len());
            for (s_k, y_k, rho) in history.iter().rev() {
                let alpha = rho * s_k.dot(&q);
                q = q - &(y_k * alpha);
                alphas.push(alpha);
            }
            if let Some((s_k, y_k, _)) = history.back() {
                let gamma = s_k.dot(y_k) / y_k.dot(y_k);
                q *= gamma;
            }
            for ((s_k, y_k, rho), alpha) in history.iter().zip(alphas.iter().rev()) {
                let beta = rho * y_k.dot(&q);
                q = q + &(s_k * (alpha - beta));
            }
            let mut direction = -q;

            let mut slope = grad.dot(&direction);
            if slope >= 0.0 {
                history.clear();
                direction = -&grad;
                slope = grad.dot(&direction);
            }

            // Backtracking line search (Armijo)
            let mut step = if history.is_empty() { 1.0 / Self::max_norm(&grad).max(1.0) } else { 1.0 };
            let mut accepted = None;
            for _ in 0..40 {
                let candidate = &theta + &(&direction * step);
                let (new_loss, new_grad) = self.loss_and_grad(&candidate, x, y)?;
                if new_loss <= loss + 1e-4 * step * slope {
                    accepted = Some((candidate, new_loss, new_grad));
                    break;
                }
                step *= 0.5;
            }
            let Some((next, next_loss, next_grad)) = accepted else {
                break;
            };

            let s_k = &next - &theta;
            let y_k = &next_grad - &grad;
            let sy = s_k.dot(&y_k);
            if sy > 1e-10 {
                if history.len() == HISTORY {
                    history.pop_front();
                }
                history.push_back((s_k, y_k, 1.0 / sy));
            }

            let improvement = (loss - next_loss).abs();
            theta = next;
            loss = next_loss;
            grad = next_grad;

            if (iter + 1) % 10 == 0 {
                observer.progress(&format!("lbfgs iteration {}: loss {:.6}", iter + 1, loss), Some((iter + 1) as u64));
            }
            if improvement <= f64::EPSILON * loss.abs().max(1.0) {
                break;
            }
        }
        Ok(theta)
    }

    fn minimize_gd(&mut self, mut theta: Array1<f64>, x: &Array2<f64>, y: &Array2<f64>, observer: &dyn TrainingObserver) -> Result<Array1<f64>> {
        for iter in 0..self.max_iter {
            self.n_iter = iter + 1;
            let (loss, grad) = self.loss_and_grad(&theta, x, y)?;
            if Self::max_norm(&grad) < self.tol {
                break;
            }
            theta = theta - &(grad * self.learning_rate);
            if (iter + 1) % 10 == 0 {
                observer.progress(&format!("gd iteration {}: loss {:.6}", iter + 1, loss), Some((iter + 1) as u64));
            }
        }
        Ok(theta)
    }

    fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (Some(w), Some(b), Some(means), Some(scales)) =
            (&self.coefficients, &self.intercepts, &self.means, &self.scales)
        else {
            return Err(ServiceError::internal("Logistic regression has not been fitted"));
        };
        if x.ncols() != w.nrows() {
            return Err(ServiceError::invalid(format!(
                "Expected {} features, got {}",
                w.nrows(),
                x.ncols()
            )));
        }
        let xs = Self::standardize(x, means, scales);
        Ok(xs.dot(w) + &b.view().insert_axis(Axis(0)))
    }

    /// Class probabilities, one row per sample
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut z = self.decision_function(x)?;
        Self::softmax(&mut z);
        Ok(z)
    }
}

impl Classifier for LogisticRegression {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        observer: &dyn TrainingObserver,
    ) -> Result<()> {
        let (n, d) = x.dim();
        if n != y.len() {
            return Err(ServiceError::invalid(format!(
                "Feature rows ({}) and target length ({}) differ",
                n,
                y.len()
            )));
        }
        let present = {
            let mut seen = vec![false; n_classes];
            y.iter().for_each(|&c| seen[c] = true);
            seen.iter().filter(|&&s| s).count()
        };
        if present < 2 {
            return Err(ServiceError::invalid(
                "Logistic regression needs at least two distinct classes in the training data",
            ));
        }

        let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let scales = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let xs = Self::standardize(x, &means, &scales);

        let mut y_onehot = Array2::zeros((n, n_classes));
        for (i, &c) in y.iter().enumerate() {
            y_onehot[[i, c]] = 1.0;
        }

        let theta = Array1::zeros(d * n_classes + n_classes);
        let theta = match self.solver {
            Solver::Lbfgs => self.minimize_lbfgs(theta, &xs, &y_onehot, observer)?,
            Solver::GradientDescent => self.minimize_gd(theta, &xs, &y_onehot, observer)?,
        };

        let w = Array2::from_shape_vec((d, n_classes), theta.slice(s![..d * n_classes]).to_vec())?;
        self.coefficients = Some(w);
        self.intercepts = Some(theta.slice(s![d * n_classes..]).to_owned());
        self.means = Some(means);
        self.scales = Some(scales);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let z = self.decision_function(x)?;
        Ok(z
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect())
    }
}
