use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::ml::classifier::Hyperparameters;
use crate::ml::models::ModelMetrics;
use crate::serving::PredictionResult;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Health check endpoint; always 200, reports what is loaded
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let loaded = state.model.is_loaded();
    Json(HealthResponse {
        status: if loaded { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        model_loaded: loaded,
        scaler_loaded: loaded,
        features_loaded: loaded,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub model_loaded: bool,
    pub scaler_loaded: bool,
    pub features_loaded: bool,
}

/// Liveness check
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check; 503 until a complete bundle is loaded
pub async fn readiness(State(state): State<AppState>) -> Result<StatusCode> {
    state.model.current()?;
    Ok(StatusCode::OK)
}

/// Score one customer
pub async fn predict(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictResponse>> {
    let result = score(&state, body);
    match &result {
        Ok(response) => {
            let label = if response.result.label == 1 { "churn" } else { "not_churn" };
            crate::metrics::PREDICTIONS_TOTAL.with_label_values(&[label]).inc();
        }
        Err(e) => {
            crate::metrics::PREDICTION_ERRORS_TOTAL
                .with_label_values(&[e.error_code()])
                .inc();
        }
    }
    result.map(Json)
}

fn score(
    state: &AppState,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<PredictResponse> {
    let Json(body) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let input = match body {
        Value::Object(map) if !map.is_empty() => map,
        _ => return Err(AppError::Validation("No data provided".to_string())),
    };

    let context = state.model.current()?;
    let result = context.predict(&input)?;
    Ok(PredictResponse {
        success: true,
        result,
    })
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: PredictionResult,
}

/// Describe the loaded model
pub async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfoResponse>> {
    let context = state.model.current()?;
    let artifact = context.artifact();

    Ok(Json(ModelInfoResponse {
        success: true,
        model_type: artifact.model_type.clone(),
        features: context.schema().names().to_vec(),
        num_features: context.schema().len(),
        best_params: artifact.hyperparameters,
        cv_score: artifact.cv_score,
        converged: artifact.converged,
        metrics: artifact.metrics.clone(),
        timestamp: artifact.created_at.to_rfc3339(),
        bundle_id: context.bundle_id(),
        loaded_at: context.loaded_at().to_rfc3339(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub success: bool,
    pub model_type: String,
    pub features: Vec<String>,
    pub num_features: usize,
    pub best_params: Hyperparameters,
    pub cv_score: Option<f64>,
    pub converged: bool,
    pub metrics: ModelMetrics,
    pub timestamp: String,
    pub bundle_id: Uuid,
    pub loaded_at: String,
}

/// Reload artifacts from disk and swap them in as one unit
pub async fn reload_artifacts(State(state): State<AppState>) -> Result<Json<ReloadResponse>> {
    let model = state.model.clone();
    let store = state.store.clone();

    let outcome = tokio::task::spawn_blocking(move || model.reload_from(&store))
        .await
        .map_err(|e| AppError::Internal(format!("Reload task failed: {}", e)))?;

    let label = if outcome.is_ok() { "success" } else { "failure" };
    crate::metrics::ARTIFACT_RELOADS_TOTAL
        .with_label_values(&[label])
        .inc();

    let bundle_id = outcome?;
    tracing::info!(bundle_id = %bundle_id, "Artifacts reloaded");
    Ok(Json(ReloadResponse {
        success: true,
        bundle_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub bundle_id: Uuid,
}

/// Prometheus metrics endpoint
///
/// Returns metrics in Prometheus text exposition format
pub async fn metrics() -> (StatusCode, String) {
    let metrics = crate::metrics::gather_metrics();
    (StatusCode::OK, metrics)
}
