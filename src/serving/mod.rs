//! Online inference against a loaded artifact bundle.

use crate::artifacts::{ArtifactBundle, ArtifactStore};
use crate::error::{AppError, Result};
use crate::ml::classifier::{decide, sigmoid};
use crate::ml::data::{FeatureSchema, Label};
use crate::ml::models::ModelArtifact;
use crate::ml::scaler::ScalerState;
use ndarray::Array1;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Answer to one prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: Label,

    /// "Churn" or "Not Churn"
    pub label_text: String,

    /// Percentages rounded to two decimals
    pub probability_not_churn: f64,
    pub probability_churn: f64,

    /// The request body, echoed unchanged
    pub echoed_input: Map<String, Value>,
}

/// Everything needed to serve: model, scaler and schema from one bundle.
///
/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug)]
pub struct ServingContext {
    bundle_id: Uuid,
    artifact: ModelArtifact,
    scaler: ScalerState,
    schema: FeatureSchema,
    loaded_at: chrono::DateTime<chrono::Utc>,
}

impl ServingContext {
    pub fn new(bundle: ArtifactBundle) -> Result<Self> {
        bundle.validate()?;
        Ok(Self {
            bundle_id: bundle.bundle_id,
            artifact: bundle.model,
            scaler: bundle.scaler,
            schema: bundle.schema,
            loaded_at: chrono::Utc::now(),
        })
    }

    pub fn bundle_id(&self) -> Uuid {
        self.bundle_id
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn scaler(&self) -> &ScalerState {
        &self.scaler
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn loaded_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.loaded_at
    }

    /// Validate, reorder, scale and score one request.
    ///
    /// Keys not in the schema are ignored. All missing features are reported
    /// together; value errors name the first offending feature in schema order.
    pub fn predict(&self, input: &Map<String, Value>) -> Result<PredictionResult> {
        let started = Instant::now();

        let missing: Vec<String> = self
            .schema
            .names()
            .iter()
            .filter(|name| !input.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AppError::MissingFeature(missing));
        }

        let mut raw = Vec::with_capacity(self.schema.len());
        for name in self.schema.names() {
            raw.push(coerce(name, &input[name.as_str()])?);
        }

        let scaled = self.scaler.transform_row(Array1::from_vec(raw).view())?;
        if let Some(idx) = scaled.iter().position(|v| !v.is_finite()) {
            return Err(AppError::InvalidValue(self.schema.names()[idx].clone()));
        }

        let classifier = &self.artifact.classifier;
        let decision = classifier.decision_one(scaled.view());
        if !decision.is_finite() {
            return Err(AppError::InvalidValue(self.dominant_feature(&scaled)));
        }

        let probability = sigmoid(decision);
        let label = decide(probability);

        let result = PredictionResult {
            label,
            label_text: if label == 1 { "Churn" } else { "Not Churn" }.to_string(),
            probability_not_churn: percent(1.0 - probability),
            probability_churn: percent(probability),
            echoed_input: input.clone(),
        };

        crate::metrics::PREDICTION_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        debug!(
            label = result.label,
            churn = result.probability_churn,
            "Prediction served"
        );
        Ok(result)
    }
}

impl ServingContext {
    /// Feature with the largest `|w_i * x_i|`; the one that overflowed the score
    fn dominant_feature(&self, scaled: &Array1<f64>) -> String {
        let weights = &self.artifact.classifier.weights;
        let mut best = 0;
        let mut best_mag = f64::NEG_INFINITY;
        for (i, (x, w)) in scaled.iter().zip(weights.iter()).enumerate() {
            let mag = (x * w).abs();
            if mag > best_mag {
                best = i;
                best_mag = mag;
            }
        }
        self.schema.names()[best].clone()
    }
}

fn coerce(name: &str, value: &Value) -> Result<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(AppError::InvalidValue(name.to_string())),
    }
}

fn percent(p: f64) -> f64 {
    (p * 100.0 * 100.0).round() / 100.0
}

/// Swappable reference to the serving context.
///
/// Readers take a cheap `Arc` clone and keep using it even if a reload lands
/// mid-request; a reload replaces the whole context in one write.
#[derive(Debug, Clone, Default)]
pub struct ModelHandle {
    inner: Arc<RwLock<Option<Arc<ServingContext>>>>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: ServingContext) -> Self {
        let handle = Self::new();
        handle.install(context);
        handle
    }

    /// Current context or `ModelNotLoaded`
    pub fn current(&self) -> Result<Arc<ServingContext>> {
        self.inner.read().clone().ok_or_else(|| {
            AppError::ModelNotLoaded("no artifacts loaded; train a model first".to_string())
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn install(&self, context: ServingContext) {
        *self.inner.write() = Some(Arc::new(context));
        crate::metrics::ARTIFACTS_LOADED.set(1.0);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
        crate::metrics::ARTIFACTS_LOADED.set(0.0);
    }

    /// Load a fresh bundle and swap it in. On failure the previous context
    /// stays in place.
    pub fn reload_from(&self, store: &ArtifactStore) -> Result<Uuid> {
        let context = ServingContext::new(store.load()?)?;
        let bundle_id = context.bundle_id();
        self.install(context);
        info!(bundle_id = %bundle_id, "Serving context swapped");
        Ok(bundle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::{Hyperparameters, LinearModel};
    use crate::ml::models::{ConfusionMatrix, ModelMetrics};
    use ndarray::array;
    use serde_json::json;

    fn context() -> ServingContext {
        context_with(
            &["AccountWeeks", "DayMins", "CustServCalls"],
            array![0.05, 0.9, 0.7],
            array![100.0, 180.0, 1.5],
            array![40.0, 55.0, 1.3],
        )
    }

    fn context_with(
        names: &[&str],
        weights: Array1<f64>,
        mean: Array1<f64>,
        scale: Array1<f64>,
    ) -> ServingContext {
        let schema = FeatureSchema::new(names.iter().map(|n| n.to_string()).collect());
        let model = ModelArtifact {
            model_type: ModelArtifact::MODEL_TYPE.to_string(),
            classifier: LinearModel {
                weights,
                bias: -1.8,
            },
            hyperparameters: Hyperparameters::default(),
            cv_score: None,
            converged: true,
            feature_influence: Vec::new(),
            metrics: ModelMetrics {
                accuracy: 0.0,
                precision: 0.0,
                recall: 0.0,
                f1_score: 0.0,
                roc_auc: 0.5,
                log_loss: 0.0,
                confusion_matrix: ConfusionMatrix::default(),
            },
            schema_fingerprint: schema.fingerprint(),
            n_training_samples: 10,
            created_at: chrono::Utc::now(),
        };
        let scaler = ScalerState {
            mean,
            scale,
            constant_features: Vec::new(),
            n_samples_seen: 10,
        };
        ServingContext::new(ArtifactBundle {
            bundle_id: Uuid::new_v4(),
            model,
            scaler,
            schema,
        })
        .unwrap()
    }

    fn request(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_feature_is_named() {
        let ctx = context();
        let err = ctx
            .predict(&request(json!({"AccountWeeks": 100, "DayMins": 200})))
            .unwrap_err();
        match err {
            AppError::MissingFeature(names) => assert_eq!(names, vec!["CustServCalls"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_every_missing_feature_is_listed() {
        let ctx = context();
        match ctx.predict(&Map::new()).unwrap_err() {
            AppError::MissingFeature(names) => assert_eq!(names.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let ctx = context();
        let base = json!({"AccountWeeks": 120, "DayMins": 250.5, "CustServCalls": 4});
        let mut extra = base.clone();
        extra["foo"] = json!("bar");

        let a = ctx.predict(&request(base)).unwrap();
        let b = ctx.predict(&request(extra)).unwrap();
        assert_eq!(a.label, b.label);
        assert_eq!(a.probability_churn, b.probability_churn);
        assert_eq!(a.probability_not_churn, b.probability_not_churn);
        assert!(b.echoed_input.contains_key("foo"));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let ctx = context();
        let a = ctx
            .predict(&request(json!({"AccountWeeks": 90, "DayMins": 150, "CustServCalls": 1})))
            .unwrap();
        let b = ctx
            .predict(&request(json!({"CustServCalls": 1, "DayMins": 150, "AccountWeeks": 90})))
            .unwrap();
        assert_eq!(a.probability_churn, b.probability_churn);
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let ctx = context();
        let a = ctx
            .predict(&request(json!({"AccountWeeks": " 90 ", "DayMins": "150.0", "CustServCalls": "1"})))
            .unwrap();
        let b = ctx
            .predict(&request(json!({"AccountWeeks": 90, "DayMins": 150, "CustServCalls": 1})))
            .unwrap();
        assert_eq!(a.probability_churn, b.probability_churn);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let ctx = context();
        for bad in [json!("abc"), json!(null), json!(true), json!([1]), json!("NaN"), json!("inf")] {
            let err = ctx
                .predict(&request(json!({"AccountWeeks": 90, "DayMins": bad, "CustServCalls": 1})))
                .unwrap_err();
            match err {
                AppError::InvalidValue(name) => assert_eq!(name, "DayMins"),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_overflowing_scaled_value_is_rejected() {
        // Scale below 1 pushes 1e308 past f64::MAX; the zero weight would turn it into NaN
        let ctx = context_with(
            &["ContractRenewal", "DayMins"],
            array![0.0, 0.8],
            array![0.9, 180.0],
            array![0.3, 55.0],
        );
        let err = ctx
            .predict(&request(json!({"ContractRenewal": "1e308", "DayMins": 200})))
            .unwrap_err();
        match err {
            AppError::InvalidValue(name) => assert_eq!(name, "ContractRenewal"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_overflowing_score_is_rejected() {
        // Each scaled value is finite but the weighted sum is not
        let ctx = context_with(
            &["DayMins", "RoamMins"],
            array![1.0, 10.0],
            array![0.0, 0.0],
            array![1.0, 1.0],
        );
        let err = ctx
            .predict(&request(json!({"DayMins": 1e307, "RoamMins": 1e308})))
            .unwrap_err();
        match err {
            AppError::InvalidValue(name) => assert_eq!(name, "RoamMins"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_large_finite_input_keeps_probabilities_whole() {
        let ctx = context();
        let result = ctx
            .predict(&request(json!({"AccountWeeks": 1e200, "DayMins": 150, "CustServCalls": 1})))
            .unwrap();
        assert!((result.probability_churn + result.probability_not_churn - 100.0).abs() <= 0.011);
        assert_eq!(result.label, 1);
    }

    #[test]
    fn test_probabilities_and_label_are_consistent() {
        let ctx = context();
        for (weeks, mins, calls) in [(10, 50, 0), (100, 180, 1), (150, 320, 6), (200, 350, 9)] {
            let result = ctx
                .predict(&request(json!({"AccountWeeks": weeks, "DayMins": mins, "CustServCalls": calls})))
                .unwrap();
            let total = result.probability_churn + result.probability_not_churn;
            assert!((total - 100.0).abs() <= 0.011);
            assert_eq!(result.label == 1, result.probability_churn >= 50.0);
            assert_eq!(
                result.label_text,
                if result.label == 1 { "Churn" } else { "Not Churn" }
            );
        }
    }

    #[test]
    fn test_response_wire_names() {
        let ctx = context();
        let result = ctx
            .predict(&request(json!({"AccountWeeks": 90, "DayMins": 150, "CustServCalls": 1})))
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "echoed_input",
                "label",
                "label_text",
                "probability_churn",
                "probability_not_churn"
            ]
        );
        assert_eq!(json["echoed_input"]["AccountWeeks"], 90);
    }

    #[test]
    fn test_handle_swaps_whole_context() {
        let handle = ModelHandle::new();
        assert!(matches!(
            handle.current().unwrap_err(),
            AppError::ModelNotLoaded(_)
        ));

        handle.install(context());
        let first = handle.current().unwrap();
        handle.install(context());
        let second = handle.current().unwrap();
        assert_ne!(first.bundle_id(), second.bundle_id());

        // A reader holding the old context keeps a complete, usable triple
        assert_eq!(first.schema().len(), first.scaler().n_features());

        handle.clear();
        assert!(!handle.is_loaded());
    }
}
