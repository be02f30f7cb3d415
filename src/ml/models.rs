use crate::error::ConvergenceWarning;
use crate::ml::classifier::{Hyperparameters, LinearModel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display names of the two classes, index = label
pub const CLASS_NAMES: [&str; 2] = ["Not Churned", "Churned"];

/// Held-out performance of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Accuracy (0.0 - 1.0)
    pub accuracy: f64,

    /// Precision of the churn class
    pub precision: f64,

    /// Recall of the churn class
    pub recall: f64,

    /// F1 score of the churn class
    pub f1_score: f64,

    /// Area under the ROC curve
    pub roc_auc: f64,

    /// Mean logistic loss
    #[serde(default)]
    pub log_loss: f64,

    /// Rows are actual, columns predicted
    pub confusion_matrix: ConfusionMatrix,
}

/// `[[tn, fp], [fn, tp]]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[[usize; 2]; 2]", into = "[[usize; 2]; 2]")]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl From<[[usize; 2]; 2]> for ConfusionMatrix {
    fn from(m: [[usize; 2]; 2]) -> Self {
        Self {
            tn: m[0][0],
            fp: m[0][1],
            fn_: m[1][0],
            tp: m[1][1],
        }
    }
}

impl From<ConfusionMatrix> for [[usize; 2]; 2] {
    fn from(m: ConfusionMatrix) -> Self {
        [[m.tn, m.fp], [m.fn_, m.tp]]
    }
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }
}

/// Per-class metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// One threshold of the ROC sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub threshold: f64,
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
}

/// A feature and its learned coefficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfluence {
    pub feature: String,
    pub coefficient: f64,
}

/// Everything computed on the held-out partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metrics: ModelMetrics,
    pub per_class: Vec<ClassMetrics>,
    pub roc_curve: Vec<RocPoint>,
    pub feature_influence: Vec<FeatureInfluence>,
    pub n_samples: usize,
}

/// Score of one grid candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub hyperparameters: Hyperparameters,
    pub mean_score: f64,
    pub fold_scores: Vec<f64>,
    /// Folds whose fit hit the iteration bound
    pub unconverged_folds: usize,
}

/// Outcome of [`crate::ml::Trainer::train`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub hyperparameters: Hyperparameters,
    /// Mean cross-validated ROC AUC of the winner; absent without tuning
    pub cv_score: Option<f64>,
    pub candidates: Vec<CandidateResult>,
    pub converged: bool,
    pub iterations: usize,
    pub warnings: Vec<ConvergenceWarning>,
}

/// The persisted model blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_type: String,
    pub classifier: LinearModel,
    pub hyperparameters: Hyperparameters,
    pub cv_score: Option<f64>,
    pub converged: bool,
    pub feature_influence: Vec<FeatureInfluence>,
    pub metrics: ModelMetrics,
    /// SHA-256 of the ordered feature names the weights align with
    pub schema_fingerprint: String,
    pub n_training_samples: usize,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub const MODEL_TYPE: &'static str = "LogisticRegression";
}

/// Summary of a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub bundle_id: Uuid,
    pub hyperparameters: Hyperparameters,
    pub cv_score: Option<f64>,
    pub converged: bool,
    pub metrics: ModelMetrics,
    pub top_features: Vec<FeatureInfluence>,
    pub n_train: usize,
    pub n_test: usize,
    pub saved_files: Vec<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_serializes_as_nested_array() {
        let m = ConfusionMatrix {
            tn: 5,
            fp: 1,
            fn_: 2,
            tp: 3,
        };
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json, serde_json::json!([[5, 1], [2, 3]]));

        let back: ConfusionMatrix = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.total(), 11);
    }
}
