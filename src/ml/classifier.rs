use crate::error::{AppError, ConvergenceWarning, Result};
use crate::ml::data::Label;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Decision threshold on the churn probability
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Trait for binary classifiers
pub trait Classifier: Send + Sync {
    /// Probability of the positive class for every row
    fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array1<f64>>;

    /// Hard labels at [`DECISION_THRESHOLD`]
    fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<Label>> {
        Ok(self.predict_proba(features)?.mapv(decide))
    }

    /// Number of input features
    fn n_features(&self) -> usize;
}

/// Regularization penalty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Penalty {
    L1,
    L2,
}

/// Optimization routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Solver {
    /// Plain gradient descent; smooth objectives only
    GradientDescent,
    /// Proximal gradient (ISTA); handles both penalties
    ProximalGradient,
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Penalty::L1 => write!(f, "l1"),
            Penalty::L2 => write!(f, "l2"),
        }
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Solver::GradientDescent => write!(f, "gradient_descent"),
            Solver::ProximalGradient => write!(f, "proximal_gradient"),
        }
    }
}

impl Solver {
    pub fn supports(&self, penalty: Penalty) -> bool {
        match self {
            Solver::GradientDescent => penalty == Penalty::L2,
            Solver::ProximalGradient => true,
        }
    }
}

/// One point of the hyperparameter space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Inverse regularization strength
    pub c: f64,
    pub penalty: Penalty,
    pub solver: Solver,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_max_iter() -> usize {
    1000
}

fn default_tolerance() -> f64 {
    1e-4
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            c: 1.0,
            penalty: Penalty::L2,
            solver: Solver::GradientDescent,
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
        }
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "C={}, penalty={}, solver={}",
            self.c, self.penalty, self.solver
        )
    }
}

impl Hyperparameters {
    pub fn is_compatible(&self) -> bool {
        self.solver.supports(self.penalty)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.c.is_finite() || self.c <= 0.0 {
            return Err(AppError::InvalidHyperparameter(format!(
                "C must be a positive finite number, got {}",
                self.c
            )));
        }
        if self.max_iter == 0 {
            return Err(AppError::InvalidHyperparameter(
                "max_iter must be at least 1".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(AppError::InvalidHyperparameter(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !self.is_compatible() {
            return Err(AppError::InvalidHyperparameter(format!(
                "solver {} does not support penalty {}",
                self.solver, self.penalty
            )));
        }
        Ok(())
    }
}

/// Fitted logistic regression: `p = sigmoid(w·x + b)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Array1<f64>,
    pub bias: f64,
}

impl LinearModel {
    pub fn decision_function(&self, features: ArrayView2<f64>) -> Array1<f64> {
        features.dot(&self.weights) + self.bias
    }

    /// Linear score `w·x + b` for one already-scaled vector
    pub fn decision_one(&self, row: ArrayView1<f64>) -> f64 {
        row.dot(&self.weights) + self.bias
    }

    /// Churn probability for one already-scaled vector
    pub fn predict_one(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.decision_one(row))
    }
}

impl Classifier for LinearModel {
    fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array1<f64>> {
        if features.ncols() != self.weights.len() {
            return Err(AppError::Schema(format!(
                "model expects {} features, got {}",
                self.weights.len(),
                features.ncols()
            )));
        }
        Ok(self.decision_function(features).mapv(sigmoid))
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }
}

/// Result of one solver run
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub model: LinearModel,
    pub iterations: usize,
    pub converged: bool,
    pub warning: Option<ConvergenceWarning>,
}

/// Numerically stable logistic function
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `p >= 0.5` is churn
pub fn decide(probability: f64) -> Label {
    if probability >= DECISION_THRESHOLD {
        1
    } else {
        0
    }
}

/// Fit a logistic regression on scaled features.
///
/// Minimizes `mean(logloss) + R(w) / (C * n)` starting from zero weights with a
/// fixed step `1 / L`, where `L = 0.25 * (||X||_F^2 / n + 1)` bounds the
/// curvature of the mean logloss (the `+ 1` covers the intercept column).
/// The run is deterministic for identical inputs.
pub fn fit(x: ArrayView2<f64>, y: ArrayView1<Label>, params: &Hyperparameters) -> Result<FitOutcome> {
    params.validate()?;

    let (n, d) = x.dim();
    if n == 0 {
        return Err(AppError::InsufficientData(
            "cannot fit on zero rows".to_string(),
        ));
    }
    if y.len() != n {
        return Err(AppError::Schema(format!(
            "{} feature rows but {} labels",
            n,
            y.len()
        )));
    }

    let n_f = n as f64;
    let targets: Array1<f64> = y.mapv(f64::from);
    let lambda = 1.0 / (params.c * n_f);

    let frobenius_sq: f64 = x.iter().map(|v| v * v).sum();
    let mut lipschitz = 0.25 * (frobenius_sq / n_f + 1.0);
    if params.solver == Solver::GradientDescent {
        lipschitz += lambda;
    }
    let step = 1.0 / lipschitz;

    let mut weights = Array1::<f64>::zeros(d);
    let mut bias = 0.0;
    let mut criterion = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iter {
        iterations += 1;

        let (grad_w, grad_b) = loss_gradient(x, &targets, &weights, bias);

        match params.solver {
            Solver::GradientDescent => {
                let grad_w = grad_w + &weights * lambda;
                criterion = max_abs(&grad_w).max(grad_b.abs());
                if criterion < params.tolerance {
                    converged = true;
                    break;
                }
                weights.scaled_add(-step, &grad_w);
                bias -= step * grad_b;
            }
            Solver::ProximalGradient => {
                let mut candidate = &weights - &(&grad_w * step);
                prox(&mut candidate, params.penalty, step * lambda);
                let new_bias = bias - step * grad_b;

                // Gradient mapping (θ - θ⁺) / step
                let mapping = (&weights - &candidate) / step;
                criterion = max_abs(&mapping).max(grad_b.abs());

                weights = candidate;
                bias = new_bias;
                if criterion < params.tolerance {
                    converged = true;
                    break;
                }
            }
        }
    }

    let warning = if converged {
        debug!(params = %params, iterations, "Solver converged");
        None
    } else {
        let warning = ConvergenceWarning {
            solver: params.solver.to_string(),
            max_iter: params.max_iter,
            final_step_norm: criterion,
        };
        warn!(params = %params, "{}", warning);
        Some(warning)
    };

    Ok(FitOutcome {
        model: LinearModel { weights, bias },
        iterations,
        converged,
        warning,
    })
}

/// Gradient of the mean logloss with respect to weights and bias
fn loss_gradient(
    x: ArrayView2<f64>,
    targets: &Array1<f64>,
    weights: &Array1<f64>,
    bias: f64,
) -> (Array1<f64>, f64) {
    let n = x.nrows() as f64;
    let residual = (x.dot(weights) + bias).mapv(sigmoid) - targets;
    let grad_w = x.t().dot(&residual) / n;
    let grad_b = residual.sum() / n;
    (grad_w, grad_b)
}

fn prox(weights: &mut Array1<f64>, penalty: Penalty, threshold: f64) {
    match penalty {
        Penalty::L1 => weights.mapv_inplace(|w| w.signum() * (w.abs() - threshold).max(0.0)),
        Penalty::L2 => weights.mapv_inplace(|w| w / (1.0 + threshold)),
    }
}

fn max_abs(values: &Array1<f64>) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Logistic loss of a probability vector, averaged; used in diagnostics
pub fn log_loss(y: ArrayView1<Label>, probabilities: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-15;
    if y.is_empty() {
        return 0.0;
    }
    let total: f64 = y
        .iter()
        .zip(probabilities.iter())
        .map(|(&label, &p)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            if label == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / y.len() as f64
}

/// Build the raw feature matrix and labels used by the tests of several modules
#[cfg(test)]
pub(crate) fn separable_fixture(n: usize) -> (Array2<f64>, Array1<Label>) {
    let x = Array2::from_shape_fn((n, 2), |(i, j)| {
        let t = (i as f64 / n as f64) * 4.0 - 2.0;
        if j == 0 {
            t + ((i * 7) % 5) as f64 * 0.3 - 0.6
        } else {
            ((i * 13) % 11) as f64 / 11.0 - 0.5
        }
    });
    let y = Array1::from_shape_fn(n, |i| if i >= n / 2 { 1 } else { 0 });
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(-800.0).is_finite());
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_decision_threshold_is_inclusive() {
        assert_eq!(decide(0.5), 1);
        assert_eq!(decide(0.4999), 0);
    }

    #[test]
    fn test_compatibility() {
        assert!(Solver::ProximalGradient.supports(Penalty::L1));
        assert!(Solver::ProximalGradient.supports(Penalty::L2));
        assert!(Solver::GradientDescent.supports(Penalty::L2));
        assert!(!Solver::GradientDescent.supports(Penalty::L1));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_c = Hyperparameters {
            c: 0.0,
            ..Hyperparameters::default()
        };
        assert!(matches!(
            bad_c.validate().unwrap_err(),
            AppError::InvalidHyperparameter(_)
        ));

        let incompatible = Hyperparameters {
            penalty: Penalty::L1,
            solver: Solver::GradientDescent,
            ..Hyperparameters::default()
        };
        assert!(incompatible.validate().is_err());

        let x = array![[1.0], [2.0]];
        let y = array![0, 1];
        assert!(fit(x.view(), y.view(), &incompatible).is_err());
    }

    #[test]
    fn test_fit_learns_separable_data() {
        let (x, y) = separable_fixture(200);
        for params in [
            Hyperparameters::default(),
            Hyperparameters {
                solver: Solver::ProximalGradient,
                ..Hyperparameters::default()
            },
            Hyperparameters {
                penalty: Penalty::L1,
                solver: Solver::ProximalGradient,
                ..Hyperparameters::default()
            },
        ] {
            let outcome = fit(x.view(), y.view(), &params).unwrap();
            assert!(outcome.model.weights[0] > 0.0, "{params}");
            let predicted = outcome.model.predict(x.view()).unwrap();
            let correct = predicted.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
            assert!(correct as f64 / 200.0 > 0.8, "{params}");
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (x, y) = separable_fixture(120);
        let params = Hyperparameters {
            c: 0.1,
            penalty: Penalty::L1,
            solver: Solver::ProximalGradient,
            ..Hyperparameters::default()
        };
        let a = fit(x.view(), y.view(), &params).unwrap();
        let b = fit(x.view(), y.view(), &params).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_strong_l1_zeroes_weights() {
        let (x, y) = separable_fixture(100);
        let params = Hyperparameters {
            c: 1e-4,
            penalty: Penalty::L1,
            solver: Solver::ProximalGradient,
            ..Hyperparameters::default()
        };
        let outcome = fit(x.view(), y.view(), &params).unwrap();
        assert!(outcome.model.weights.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_iteration_bound_yields_warning_not_error() {
        let (x, y) = separable_fixture(100);
        let params = Hyperparameters {
            max_iter: 2,
            ..Hyperparameters::default()
        };
        let outcome = fit(x.view(), y.view(), &params).unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 2);
        let warning = outcome.warning.unwrap();
        assert_eq!(warning.max_iter, 2);
        assert_eq!(warning.solver, "gradient_descent");
    }

    #[test]
    fn test_predict_proba_rejects_wrong_width() {
        let model = LinearModel {
            weights: array![1.0, -1.0],
            bias: 0.0,
        };
        assert!(model.predict_proba(array![[1.0]].view()).is_err());
        let p = model.predict_proba(array![[1.0, 1.0]].view()).unwrap();
        assert_eq!(p[0], 0.5);
    }

    #[test]
    fn test_log_loss() {
        let y = array![1u8, 0];
        let perfect = array![1.0, 0.0];
        assert!(log_loss(y.view(), &perfect) < 1e-10);
        let coin = array![0.5, 0.5];
        assert!((log_loss(y.view(), &coin) - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn test_hyperparameters_serde_names() {
        let params = Hyperparameters {
            penalty: Penalty::L1,
            solver: Solver::ProximalGradient,
            ..Hyperparameters::default()
        };
        let json = serde_json::to_value(params).unwrap();
        assert_eq!(json["penalty"], "l1");
        assert_eq!(json["solver"], "proximal_gradient");
    }
}
