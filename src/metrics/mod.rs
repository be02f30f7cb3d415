//! Prometheus metrics for the churn prediction service.
//!
//! Covers:
//! - HTTP request tracking
//! - Prediction outcomes and latency
//! - Training runs and grid-search fits
//! - Artifact load state
//!
//! # Example
//! ```no_run
//! use churn_predictor::metrics::PREDICTIONS_TOTAL;
//!
//! PREDICTIONS_TOTAL.with_label_values(&["churn"]).inc();
//! ```

mod middleware;

pub use middleware::track_metrics;

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};

const NAMESPACE: &str = "churn_predictor";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Total number of HTTP requests received
    ///
    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// HTTP request duration in seconds
    ///
    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Prediction Metrics
    // ============================================================================

    /// Total number of predictions served
    ///
    /// Labels: label (churn/not_churn)
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of predictions served")
            .namespace(NAMESPACE),
        &["label"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Total number of rejected prediction requests
    ///
    /// Labels: error_code
    pub static ref PREDICTION_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("prediction_errors_total", "Total number of rejected prediction requests")
            .namespace(NAMESPACE),
        &["error_code"]
    ).expect("Failed to create PREDICTION_ERRORS_TOTAL metric");

    /// Time spent validating, scaling and scoring one request
    pub static ref PREDICTION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "prediction_duration_seconds",
            "Prediction latency in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
    ).expect("Failed to create PREDICTION_DURATION_SECONDS metric");

    // ============================================================================
    // Training Metrics
    // ============================================================================

    /// Total number of training runs
    ///
    /// Labels: outcome (success/failure)
    pub static ref TRAINING_RUNS: CounterVec = CounterVec::new(
        Opts::new("training_runs_total", "Total number of training runs")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create TRAINING_RUNS metric");

    /// Training pipeline duration in seconds
    pub static ref TRAINING_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "training_duration_seconds",
            "Training pipeline duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
    ).expect("Failed to create TRAINING_DURATION metric");

    /// Total number of cross-validation fits completed by the grid search
    pub static ref GRID_SEARCH_FITS: Counter = Counter::with_opts(
        Opts::new("grid_search_fits_total", "Total number of grid-search fits")
            .namespace(NAMESPACE)
    ).expect("Failed to create GRID_SEARCH_FITS metric");

    // ============================================================================
    // Artifact Metrics
    // ============================================================================

    /// 1 when a complete artifact bundle is loaded for serving
    pub static ref ARTIFACTS_LOADED: Gauge = Gauge::with_opts(
        Opts::new("artifacts_loaded", "Whether serving artifacts are loaded")
            .namespace(NAMESPACE)
    ).expect("Failed to create ARTIFACTS_LOADED metric");

    /// Total number of artifact reloads
    ///
    /// Labels: outcome (success/failure)
    pub static ref ARTIFACT_RELOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("artifact_reloads_total", "Total number of artifact reloads")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create ARTIFACT_RELOADS_TOTAL metric");

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Application build info
    ///
    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Application build information")
            .namespace(NAMESPACE),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");
}

/// Initialize the Prometheus metrics registry
///
/// Registers every metric with [`PROMETHEUS_REGISTRY`]. Call once at startup;
/// a second call fails with an already-registered error.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    // Register HTTP metrics
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;

    // Register prediction metrics
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTION_ERRORS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTION_DURATION_SECONDS.clone()))?;

    // Register training metrics
    PROMETHEUS_REGISTRY.register(Box::new(TRAINING_RUNS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(TRAINING_DURATION.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(GRID_SEARCH_FITS.clone()))?;

    // Register artifact metrics
    PROMETHEUS_REGISTRY.register(Box::new(ARTIFACTS_LOADED.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ARTIFACT_RELOADS_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(BUILD_INFO.clone()))?;
    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Generate Prometheus text format metrics for the /metrics endpoint
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
