use anyhow::{anyhow, Context};
use churn_predictor::{
    artifacts::ArtifactStore,
    config::Config,
    ml::{TrainingPipeline, TrainingSummary},
    serving::ServingContext,
};
use clap::{Parser, Subcommand};
use reqwest::Client;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "churn-cli")]
#[command(about = "Churn prediction training and serving CLI", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "CHURN_ENDPOINT")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the training pipeline and save artifacts
    Train {
        /// CSV dataset (overrides configuration)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Artifact directory (overrides configuration)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Fit the default hyperparameters without grid search
        #[arg(long)]
        no_tune: bool,

        /// Split seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Held-out fraction
        #[arg(short, long)]
        test_fraction: Option<f64>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load the local artifacts and describe them
    Inspect {
        /// Artifact directory (overrides configuration)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Score a JSON object of features with the local artifacts
    Predict {
        /// JSON object, e.g. '{"AccountWeeks": 100, ...}'
        #[arg(value_name = "JSON")]
        input: String,

        /// Artifact directory (overrides configuration)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Check server health
    Health,

    /// Show the model loaded by the server
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "churn_predictor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = Client::new();

    match cli.command {
        Commands::Train {
            data,
            out,
            no_tune,
            seed,
            test_fraction,
            json,
        } => {
            let mut config = Config::load()?;
            if let Some(data) = data {
                config.data.path = data;
            }
            if let Some(out) = out {
                config.artifacts.dir = out;
            }
            if no_tune {
                config.training.tune = false;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            if let Some(fraction) = test_fraction {
                config.training.test_fraction = fraction;
            }

            let pipeline = TrainingPipeline::new(config);
            let summary = tokio::task::spawn_blocking(move || pipeline.run()).await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }

        Commands::Inspect { dir } => {
            let store = local_store(dir)?;
            let bundle = store
                .load()
                .with_context(|| format!("loading artifacts from {}", store.dir().display()))?;
            let context = ServingContext::new(bundle)?;
            let artifact = context.artifact();

            println!("Bundle:          {}", context.bundle_id());
            println!("Model type:      {}", artifact.model_type);
            println!("Trained at:      {}", artifact.created_at.to_rfc3339());
            println!("Hyperparameters: {}", artifact.hyperparameters);
            match artifact.cv_score {
                Some(score) => println!("CV ROC AUC:      {:.4}", score),
                None => println!("CV ROC AUC:      (not tuned)"),
            }
            println!("Converged:       {}", artifact.converged);
            println!("Test ROC AUC:    {:.4}", artifact.metrics.roc_auc);
            println!("Features ({}):", context.schema().len());
            for (name, (mean, scale)) in context.schema().names().iter().zip(
                context
                    .scaler()
                    .mean
                    .iter()
                    .zip(context.scaler().scale.iter()),
            ) {
                println!("  {:<24} mean {:>12.4}  scale {:>12.4}", name, mean, scale);
            }
        }

        Commands::Predict { input, dir } => {
            let store = local_store(dir)?;
            let context = ServingContext::new(store.load()?)?;
            let value: serde_json::Value =
                serde_json::from_str(&input).context("prediction input is not valid JSON")?;
            let map = value
                .as_object()
                .ok_or_else(|| anyhow!("prediction input must be a JSON object"))?;

            let result = context.predict(map)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await
                .with_context(|| format!("server at {} unreachable", cli.endpoint))?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Info => {
            let response = client
                .get(format!("{}/api/info", cli.endpoint))
                .send()
                .await
                .with_context(|| format!("server at {} unreachable", cli.endpoint))?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn local_store(dir: Option<PathBuf>) -> anyhow::Result<ArtifactStore> {
    let dir = match dir {
        Some(dir) => dir,
        None => Config::load()?.artifacts.dir,
    };
    Ok(ArtifactStore::new(dir))
}

fn print_summary(summary: &TrainingSummary) {
    println!("Training complete");
    println!("=================");
    println!("Hyperparameters: {}", summary.hyperparameters);
    if let Some(score) = summary.cv_score {
        println!("CV ROC AUC:      {:.4}", score);
    }
    if !summary.converged {
        println!("Warning: final fit stopped at the iteration limit");
    }
    println!("Rows:            {} train / {} test", summary.n_train, summary.n_test);
    println!();
    println!("Accuracy:  {:.4}", summary.metrics.accuracy);
    println!("Precision: {:.4}", summary.metrics.precision);
    println!("Recall:    {:.4}", summary.metrics.recall);
    println!("F1:        {:.4}", summary.metrics.f1_score);
    println!("ROC AUC:   {:.4}", summary.metrics.roc_auc);
    println!();
    println!("Top features:");
    for (rank, feature) in summary.top_features.iter().enumerate() {
        println!("  {}. {:<24} {:+.4}", rank + 1, feature.feature, feature.coefficient);
    }
    println!();
    println!("Saved files:");
    for file in &summary.saved_files {
        println!("  - {}", file);
    }
    println!("Completed in {:.2}s", summary.duration_ms as f64 / 1000.0);
}
