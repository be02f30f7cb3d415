use crate::artifacts::{ArtifactStore, FEATURES_FILE, MODEL_FILE, REPORT_FILE, SCALER_FILE};
use crate::config::Config;
use crate::error::Result;
use crate::ml::data::{partition, Dataset};
use crate::ml::metrics::evaluate;
use crate::ml::models::{ModelArtifact, TrainingSummary};
use crate::ml::scaler::fit_and_scale;
use crate::ml::trainer::Trainer;
use std::time::Instant;
use tracing::{error, info, instrument};
use validator::Validate;

/// Number of features listed in logs and summaries
const TOP_FEATURES: usize = 5;

/// End-to-end batch training: load, prepare, train, evaluate, save.
///
/// Any failure aborts the run before the artifact store is touched.
pub struct TrainingPipeline {
    config: Config,
}

impl TrainingPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[instrument(skip(self), fields(data = %self.config.data.path.display()))]
    pub fn run(&self) -> Result<TrainingSummary> {
        let started = Instant::now();
        let result = self.execute(started);

        let outcome = if result.is_ok() { "success" } else { "failure" };
        crate::metrics::TRAINING_RUNS.with_label_values(&[outcome]).inc();
        crate::metrics::TRAINING_DURATION.observe(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            error!(error = %e, "Training run failed");
        }
        result
    }

    fn execute(&self, started: Instant) -> Result<TrainingSummary> {
        let training = &self.config.training;
        training.validate()?;

        info!("Step 1: loading data");
        let dataset = Dataset::load(&self.config.data.path, &self.config.data.label_column)?;

        info!("Step 2: checking data quality");
        let quality = dataset.quality_check();
        info!(
            total_rows = quality.total_rows,
            total_columns = quality.total_columns,
            missing_values = quality.missing_values,
            duplicate_rows = quality.duplicate_rows,
            "Data quality report"
        );

        info!("Step 3: preparing features and target");
        let (features, labels) = dataset.split_features_label()?;

        info!("Step 4: splitting and scaling");
        let (train, test) = partition(&features, &labels, training.test_fraction, training.seed)?;
        let (scaler, x_train, x_test) = fit_and_scale(&train, &test, training.zero_variance_policy)?;

        info!(tune = training.tune, "Step 5: training model");
        let trainer = Trainer::from_config(training);
        let (model, report) = trainer.train(x_train.view(), train.labels().view(), training.tune)?;

        info!("Step 6: evaluating model");
        let evaluation = evaluate(&model, x_test.view(), test.labels().view(), train.schema())?;
        for (rank, influence) in evaluation
            .feature_influence
            .iter()
            .take(TOP_FEATURES)
            .enumerate()
        {
            info!(
                "Top feature {}: {} ({:+.4})",
                rank + 1,
                influence.feature,
                influence.coefficient
            );
        }

        info!("Step 7: saving artifacts");
        let artifact = ModelArtifact {
            model_type: ModelArtifact::MODEL_TYPE.to_string(),
            classifier: model,
            hyperparameters: report.hyperparameters,
            cv_score: report.cv_score,
            converged: report.converged,
            feature_influence: evaluation.feature_influence.clone(),
            metrics: evaluation.metrics.clone(),
            schema_fingerprint: train.schema().fingerprint(),
            n_training_samples: train.len(),
            created_at: chrono::Utc::now(),
        };

        let store = ArtifactStore::new(&self.config.artifacts.dir);
        let bundle_id = store.save(&artifact, &scaler, train.schema())?;
        store.save_report(&evaluation)?;

        let saved_files = [MODEL_FILE, SCALER_FILE, FEATURES_FILE, REPORT_FILE]
            .iter()
            .map(|file| store.path(file).display().to_string())
            .collect();

        let summary = TrainingSummary {
            bundle_id,
            hyperparameters: report.hyperparameters,
            cv_score: report.cv_score,
            converged: report.converged,
            metrics: evaluation.metrics,
            top_features: evaluation
                .feature_influence
                .into_iter()
                .take(TOP_FEATURES)
                .collect(),
            n_train: train.len(),
            n_test: test.len(),
            saved_files,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            bundle_id = %summary.bundle_id,
            roc_auc = summary.metrics.roc_auc,
            duration_ms = summary.duration_ms,
            "Training pipeline completed"
        );
        Ok(summary)
    }
}
