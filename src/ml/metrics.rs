use crate::error::{AppError, Result};
use crate::ml::classifier::{decide, log_loss, Classifier, LinearModel};
use crate::ml::data::{FeatureSchema, Label};
use crate::ml::models::{
    ClassMetrics, ConfusionMatrix, EvaluationReport, FeatureInfluence, ModelMetrics, RocPoint,
    CLASS_NAMES,
};
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::cmp::Ordering;
use tracing::info;

/// Evaluate a fitted model on the scaled held-out partition
pub fn evaluate(
    model: &LinearModel,
    x_test: ArrayView2<f64>,
    y_test: ArrayView1<Label>,
    schema: &FeatureSchema,
) -> Result<EvaluationReport> {
    if schema.len() != model.n_features() {
        return Err(AppError::Schema(format!(
            "schema has {} features, model has {}",
            schema.len(),
            model.n_features()
        )));
    }

    let probabilities = model.predict_proba(x_test)?;
    let predicted = probabilities.mapv(decide);

    let confusion = confusion_matrix(y_test, predicted.view());
    let per_class = class_report(&confusion);
    let churned = &per_class[1];

    let metrics = ModelMetrics {
        accuracy: accuracy(&confusion),
        precision: churned.precision,
        recall: churned.recall,
        f1_score: churned.f1_score,
        roc_auc: roc_auc(y_test, probabilities.view())?,
        log_loss: log_loss(y_test, &probabilities),
        confusion_matrix: confusion,
    };

    info!(
        accuracy = metrics.accuracy,
        precision = metrics.precision,
        recall = metrics.recall,
        f1 = metrics.f1_score,
        roc_auc = metrics.roc_auc,
        "Model evaluation"
    );
    info!(
        "Confusion matrix: [[{}, {}], [{}, {}]]",
        confusion.tn, confusion.fp, confusion.fn_, confusion.tp
    );

    Ok(EvaluationReport {
        metrics,
        per_class,
        roc_curve: roc_curve(y_test, probabilities.view())?,
        feature_influence: feature_influence(schema, &model.weights),
        n_samples: y_test.len(),
    })
}

pub fn confusion_matrix(y_true: ArrayView1<Label>, y_pred: ArrayView1<Label>) -> ConfusionMatrix {
    let mut m = ConfusionMatrix::default();
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        match (t, p) {
            (0, 0) => m.tn += 1,
            (0, _) => m.fp += 1,
            (_, 0) => m.fn_ += 1,
            _ => m.tp += 1,
        }
    }
    m
}

pub fn accuracy(m: &ConfusionMatrix) -> f64 {
    ratio(m.tn + m.tp, m.total())
}

/// Precision, recall, F1 and support for both classes, "Not Churned" first
pub fn class_report(m: &ConfusionMatrix) -> Vec<ClassMetrics> {
    // (true positives, false positives, false negatives) from each class's view
    let views = [(m.tn, m.fn_, m.fp), (m.tp, m.fp, m.fn_)];

    views
        .iter()
        .zip(CLASS_NAMES)
        .map(|(&(tp, fp, fn_), name)| {
            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            ClassMetrics {
                class: name.to_string(),
                precision,
                recall,
                f1_score: f1(precision, recall),
                support: tp + fn_,
            }
        })
        .collect()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// ROC points from the strictest threshold down; tied scores form one step
pub fn roc_curve(y_true: ArrayView1<Label>, scores: ArrayView1<f64>) -> Result<Vec<RocPoint>> {
    let positives = y_true.iter().filter(|&&y| y == 1).count();
    let negatives = y_true.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(AppError::InsufficientData(
            "ROC analysis needs both classes present".to_string(),
        ));
    }
    if scores.len() != y_true.len() {
        return Err(AppError::Schema(format!(
            "{} scores for {} labels",
            scores.len(),
            y_true.len()
        )));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
    });

    // Above every score; kept finite so the curve survives JSON
    let mut points = vec![RocPoint {
        threshold: f64::MAX,
        false_positive_rate: 0.0,
        true_positive_rate: 0.0,
    }];

    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if y_true[order[i]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        points.push(RocPoint {
            threshold,
            false_positive_rate: fp as f64 / negatives as f64,
            true_positive_rate: tp as f64 / positives as f64,
        });
    }

    Ok(points)
}

/// Area under the ROC curve by the trapezoidal rule
pub fn roc_auc(y_true: ArrayView1<Label>, scores: ArrayView1<f64>) -> Result<f64> {
    let points = roc_curve(y_true, scores)?;
    Ok(points
        .windows(2)
        .map(|w| {
            (w[1].false_positive_rate - w[0].false_positive_rate)
                * (w[1].true_positive_rate + w[0].true_positive_rate)
                / 2.0
        })
        .sum())
}

/// Coefficients paired with feature names, largest magnitude first.
///
/// The sort is stable, so equal magnitudes keep schema order.
pub fn feature_influence(schema: &FeatureSchema, weights: &Array1<f64>) -> Vec<FeatureInfluence> {
    let mut ranking: Vec<FeatureInfluence> = schema
        .names()
        .iter()
        .zip(weights.iter())
        .map(|(name, &coefficient)| FeatureInfluence {
            feature: name.clone(),
            coefficient,
        })
        .collect();

    ranking.sort_by(|a, b| {
        b.coefficient
            .abs()
            .partial_cmp(&a.coefficient.abs())
            .unwrap_or(Ordering::Equal)
    });
    ranking
}
