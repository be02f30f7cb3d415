use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::ml::ZeroVariancePolicy;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Training dataset location
    #[serde(default)]
    pub data: DataConfig,

    /// Training pipeline configuration
    #[serde(default)]
    pub training: TrainingConfig,

    /// Artifact storage configuration
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/churn.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: CHURN__)
            .add_source(
                config::Environment::with_prefix("CHURN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV file with a header row
    #[serde(default = "default_data_path")]
    pub path: PathBuf,

    /// Name of the binary label column
    #[serde(default = "default_label_column")]
    pub label_column: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: default_data_path(),
            label_column: default_label_column(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation
    #[serde(default = "default_test_fraction")]
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub test_fraction: f64,

    /// Seed for the stratified split
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Run the cross-validated grid search
    #[serde(default = "default_true")]
    pub tune: bool,

    /// Number of cross-validation folds
    #[serde(default = "default_cv_folds")]
    #[validate(range(min = 2, max = 20))]
    pub cv_folds: usize,

    /// Grid-search worker threads (0 = available cores)
    #[serde(default)]
    pub workers: usize,

    /// Solver iteration bound
    #[serde(default = "default_max_iter")]
    #[validate(range(min = 1))]
    pub max_iter: usize,

    /// Solver convergence tolerance
    #[serde(default = "default_tolerance")]
    #[validate(range(exclusive_min = 0.0))]
    pub tolerance: f64,

    /// Inverse regularization strength used without tuning
    #[serde(default = "default_c")]
    #[validate(range(exclusive_min = 0.0))]
    pub default_c: f64,

    /// Candidate inverse regularization strengths for the grid search
    #[serde(default = "default_c_grid")]
    #[validate(length(min = 1))]
    pub c_grid: Vec<f64>,

    /// What to do with zero-variance features
    #[serde(default)]
    pub zero_variance_policy: ZeroVariancePolicy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            seed: default_seed(),
            tune: true,
            cv_folds: default_cv_folds(),
            workers: 0,
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
            default_c: default_c(),
            c_grid: default_c_grid(),
            zero_variance_policy: ZeroVariancePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory holding the model, scaler and feature-name blobs
    #[serde(default = "default_artifacts_dir")]
    pub dir: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_path() -> PathBuf {
    PathBuf::from("telecom_churn.csv")
}

fn default_label_column() -> String {
    "Churn".to_string()
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_cv_folds() -> usize {
    5
}

fn default_max_iter() -> usize {
    1000
}

fn default_tolerance() -> f64 {
    1e-4
}

fn default_c() -> f64 {
    1.0
}

fn default_c_grid() -> Vec<f64> {
    vec![0.001, 0.01, 0.1, 1.0, 10.0, 100.0]
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
