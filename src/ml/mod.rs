//! Machine learning module for churn prediction
//!
//! This module provides:
//! - CSV loading, quality reporting and stratified splitting
//! - Standardization fitted on the training partition only
//! - Logistic regression with L1/L2 penalties and two solvers
//! - Cross-validated grid search on a bounded worker pool
//! - Held-out evaluation and feature-influence ranking
//! - The end-to-end training pipeline

pub mod classifier;
pub mod data;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod scaler;
pub mod trainer;

pub use classifier::{
    fit, sigmoid, Classifier, FitOutcome, Hyperparameters, LinearModel, Penalty, Solver,
};
pub use data::{
    partition, Dataset, FeatureSchema, Features, Label, Labels, QualityReport, TestSplit,
    TrainSplit,
};
pub use metrics::{evaluate, roc_auc};
pub use models::{
    CandidateResult, ClassMetrics, ConfusionMatrix, EvaluationReport, FeatureInfluence,
    ModelArtifact, ModelMetrics, RocPoint, TrainingReport, TrainingSummary,
};
pub use pipeline::TrainingPipeline;
pub use scaler::{ScalerState, ZeroVariancePolicy};
pub use trainer::{GridSearch, ParamGrid, Trainer};
