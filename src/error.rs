use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Dataset source unreadable or malformed
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Label column absent or label values not binary
    #[error("Schema error: {0}")]
    Schema(String),

    /// Feature whose scaling statistics are unusable
    #[error("Degenerate feature(s): {}", .0.join(", "))]
    DegenerateFeature(Vec<String>),

    /// Not enough rows (or classes) to run the requested step
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Invalid or incompatible hyperparameters
    #[error("Invalid hyperparameters: {0}")]
    InvalidHyperparameter(String),

    /// One or more artifact blobs are missing
    #[error("Artifact not found: {}", .0.join(", "))]
    ArtifactNotFound(Vec<String>),

    /// Artifact blobs present but unusable
    #[error("Artifact corrupt: {0}")]
    ArtifactCorrupt(String),

    /// Inference request lacks required features
    #[error("Missing required features: {}", .0.join(", "))]
    MissingFeature(Vec<String>),

    /// Inference request value not coercible to a number
    #[error("Invalid value for feature: {0}")]
    InvalidValue(String),

    /// No artifacts are loaded for serving
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingFeature(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ModelNotLoaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ArtifactNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ArtifactCorrupt(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DataAccess(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Schema(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DegenerateFeature(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidHyperparameter(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::DataAccess(_) => "DATA_ACCESS_ERROR",
            AppError::Schema(_) => "SCHEMA_ERROR",
            AppError::DegenerateFeature(_) => "DEGENERATE_FEATURE",
            AppError::InsufficientData(_) => "INSUFFICIENT_DATA",
            AppError::InvalidHyperparameter(_) => "INVALID_HYPERPARAMETER",
            AppError::ArtifactNotFound(_) => "ARTIFACT_NOT_FOUND",
            AppError::ArtifactCorrupt(_) => "ARTIFACT_CORRUPT",
            AppError::MissingFeature(_) => "MISSING_FEATURE",
            AppError::InvalidValue(_) => "INVALID_VALUE",
            AppError::ModelNotLoaded(_) => "MODEL_NOT_LOADED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured detail for errors that carry a list of names
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::MissingFeature(names) => Some(json!({ "missing_features": names })),
            AppError::InvalidValue(name) => Some(json!({ "feature": name })),
            AppError::ArtifactNotFound(names) => Some(json!({ "missing_artifacts": names })),
            AppError::DegenerateFeature(names) => Some(json!({ "features": names })),
            _ => None,
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code().to_string();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                error_code = %error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                error_code = %error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request rejected"
            );
        }

        let mut error = json!({
            "code": error_code,
            "message": message,
            "status": status.as_u16(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        let body = Json(json!({
            "success": false,
            "error": error,
        }));

        (status, body).into_response()
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from csv::Error
impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::DataAccess(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Non-fatal notice that an iterative solver stopped at its iteration bound.
///
/// The model produced alongside it is usable but possibly suboptimal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConvergenceWarning {
    pub solver: String,
    pub max_iter: usize,
    pub final_step_norm: f64,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} did not converge within {} iterations (last update norm {:.3e})",
            self.solver, self.max_iter, self.final_step_norm
        )
    }
}
