/// Integration tests for the training pipeline and artifact round trip
///
/// These tests verify:
/// - End-to-end training with and without tuning
/// - Artifacts persisted as one bundle, plus the evaluation report
/// - Bit-identical predictions after save/load
/// - Deterministic runs for a fixed seed
/// - Failed runs leave the artifact directory untouched

mod common;

use churn_predictor::{
    artifacts::{ArtifactStore, FEATURES_FILE, MODEL_FILE, REPORT_FILE, SCALER_FILE},
    config::Config,
    ml::{
        partition, Classifier, Dataset, EvaluationReport, ModelArtifact, ScalerState, Trainer,
        TrainingPipeline, ZeroVariancePolicy,
    },
    serving::ServingContext,
    AppError,
};
use ndarray::Axis;
use tempfile::TempDir;

fn test_config(dir: &TempDir, rows: usize, tune: bool) -> Config {
    let mut config = Config::default();
    config.data.path = common::write_dataset(dir.path(), rows, 11);
    config.artifacts.dir = dir.path().join("models");
    config.training.tune = tune;
    config.training.c_grid = vec![0.1, 1.0];
    config.training.max_iter = 300;
    config.training.workers = 2;
    config
}

#[test]
fn test_pipeline_trains_and_saves_bundle() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 600, true);
    let artifacts_dir = config.artifacts.dir.clone();

    let summary = TrainingPipeline::new(config).run().unwrap();

    assert_eq!(summary.n_train + summary.n_test, 600);
    assert_eq!(summary.n_test, 120);
    assert!(summary.cv_score.is_some());
    assert!(summary.metrics.roc_auc > 0.7, "roc_auc = {}", summary.metrics.roc_auc);
    assert!(summary.top_features.len() <= 5);
    assert_eq!(summary.saved_files.len(), 4);

    for file in [MODEL_FILE, SCALER_FILE, FEATURES_FILE, REPORT_FILE] {
        assert!(artifacts_dir.join(file).is_file(), "{file} missing");
    }

    let bundle = ArtifactStore::new(&artifacts_dir).load().unwrap();
    assert_eq!(bundle.bundle_id, summary.bundle_id);
    assert_eq!(bundle.schema.names(), &common::FEATURES);
    assert_eq!(bundle.model.hyperparameters, summary.hyperparameters);
    assert_eq!(bundle.scaler.n_samples_seen, summary.n_train);

    let report: EvaluationReport =
        serde_json::from_slice(&std::fs::read(artifacts_dir.join(REPORT_FILE)).unwrap()).unwrap();
    assert_eq!(report.per_class[0].class, "Not Churned");
    assert_eq!(report.per_class[1].class, "Churned");
    assert!(report.roc_curve.len() > 2);
    assert_eq!(report.metrics, summary.metrics);
    assert_eq!(report.n_samples, summary.n_test);
}

#[test]
fn test_untuned_pipeline_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 300, false);
    let summary = TrainingPipeline::new(config).run().unwrap();

    assert!(summary.cv_score.is_none());
    assert_eq!(summary.hyperparameters.c, 1.0);
    assert_eq!(summary.hyperparameters.penalty.to_string(), "l2");
}

#[test]
fn test_pipeline_is_deterministic() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut config_b = test_config(&dir_b, 400, true);
    config_b.training.workers = 1;

    let a = TrainingPipeline::new(test_config(&dir_a, 400, true)).run().unwrap();
    let b = TrainingPipeline::new(config_b).run().unwrap();

    assert_eq!(a.hyperparameters, b.hyperparameters);
    assert_eq!(a.cv_score, b.cv_score);
    assert_eq!(a.metrics, b.metrics);

    let model_a = ArtifactStore::new(dir_a.path().join("models")).load().unwrap().model;
    let model_b = ArtifactStore::new(dir_b.path().join("models")).load().unwrap().model;
    assert_eq!(model_a.classifier, model_b.classifier);
}

#[test]
fn test_round_trip_predictions_are_bit_identical() {
    let dir = TempDir::new().unwrap();
    let csv = common::synthetic_csv(300, 5);
    let dataset = Dataset::from_reader(csv.as_bytes(), "Churn").unwrap();
    let (features, labels) = dataset.split_features_label().unwrap();
    let (train, test) = partition(&features, &labels, 0.2, 42).unwrap();

    let scaler = ScalerState::fit(&train, ZeroVariancePolicy::UnitScale).unwrap();
    let x_train = scaler.transform(train.features()).unwrap();
    let (model, report) = Trainer::default()
        .train(x_train.view(), train.labels().view(), false)
        .unwrap();

    let artifact = ModelArtifact {
        model_type: ModelArtifact::MODEL_TYPE.to_string(),
        classifier: model.clone(),
        hyperparameters: report.hyperparameters,
        cv_score: None,
        converged: report.converged,
        feature_influence: Vec::new(),
        metrics: churn_predictor::ml::evaluate(
            &model,
            scaler.transform(test.features()).unwrap().view(),
            test.labels().view(),
            train.schema(),
        )
        .unwrap()
        .metrics,
        schema_fingerprint: train.schema().fingerprint(),
        n_training_samples: train.len(),
        created_at: chrono::Utc::now(),
    };

    let store = ArtifactStore::new(dir.path());
    store.save(&artifact, &scaler, train.schema()).unwrap();
    let bundle = store.load().unwrap();

    let before = model
        .predict_proba(scaler.transform(test.features()).unwrap().view())
        .unwrap();
    let after = bundle
        .model
        .classifier
        .predict_proba(bundle.scaler.transform(test.features()).unwrap().view())
        .unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }

    // Same bits through the serving path
    let context = ServingContext::new(bundle).unwrap();
    let row = test.features().index_axis(Axis(0), 0);
    let input: serde_json::Map<String, serde_json::Value> = train
        .schema()
        .names()
        .iter()
        .zip(row.iter())
        .map(|(name, v)| (name.clone(), serde_json::json!(v)))
        .collect();
    let served = context.predict(&input).unwrap();
    let expected = (before[0] * 100.0 * 100.0).round() / 100.0;
    assert_eq!(served.probability_churn, expected);
}

#[test]
fn test_failed_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, 100, false);
    config.data.label_column = "Exited".to_string();
    let artifacts_dir = config.artifacts.dir.clone();

    let err = TrainingPipeline::new(config).run().unwrap_err();
    assert!(matches!(err, AppError::Schema(_)));
    assert!(!ArtifactStore::new(&artifacts_dir).exists());
    assert!(!artifacts_dir.join(REPORT_FILE).exists());
}

#[test]
fn test_unreadable_dataset_is_data_access_error() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, 10, false);
    config.data.path = dir.path().join("missing.csv");

    let err = TrainingPipeline::new(config).run().unwrap_err();
    assert!(matches!(err, AppError::DataAccess(_)));
}

#[test]
fn test_scaler_is_fit_on_training_rows_only() {
    let csv = common::synthetic_csv(250, 9);
    let dataset = Dataset::from_reader(csv.as_bytes(), "Churn").unwrap();
    let (features, labels) = dataset.split_features_label().unwrap();
    let (train, _test) = partition(&features, &labels, 0.2, 42).unwrap();

    let scaler = ScalerState::fit(&train, ZeroVariancePolicy::UnitScale).unwrap();
    let train_mean = train.features().mean_axis(Axis(0)).unwrap();
    let full_mean = features.values.mean_axis(Axis(0)).unwrap();

    assert_eq!(scaler.mean, train_mean);
    assert_ne!(scaler.mean, full_mean);
}
