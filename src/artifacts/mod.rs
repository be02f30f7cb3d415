//! Persistence of the trained model, its scaler and its feature schema.
//!
//! The three blobs are one logical unit: they are written together, carry a
//! shared bundle id, and are only ever loaded together.

use crate::error::{AppError, Result};
use crate::ml::data::FeatureSchema;
use crate::ml::models::{EvaluationReport, ModelArtifact};
use crate::ml::scaler::ScalerState;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

pub const MODEL_FILE: &str = "churn_model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const FEATURES_FILE: &str = "feature_names.json";
pub const REPORT_FILE: &str = "evaluation.json";

/// Envelope layout version understood by this build
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    format_version: u32,
    bundle_id: Uuid,
    payload: T,
}

/// A complete, mutually consistent set of serving artifacts
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub bundle_id: Uuid,
    pub model: ModelArtifact,
    pub scaler: ScalerState,
    pub schema: FeatureSchema,
}

impl ArtifactBundle {
    /// Check that the three parts describe the same feature space
    pub fn validate(&self) -> Result<()> {
        check_consistency(&self.model, &self.scaler, &self.schema)
    }
}

fn check_consistency(
    model: &ModelArtifact,
    scaler: &ScalerState,
    schema: &FeatureSchema,
) -> Result<()> {
    if model.schema_fingerprint != schema.fingerprint() {
        return Err(AppError::ArtifactCorrupt(
            "feature schema does not match the one the model was trained on".to_string(),
        ));
    }
    let n = schema.len();
    if model.classifier.weights.len() != n || scaler.mean.len() != n || scaler.scale.len() != n {
        return Err(AppError::ArtifactCorrupt(format!(
            "length mismatch: {} features, {} weights, {} scaler means, {} scaler scales",
            n,
            model.classifier.weights.len(),
            scaler.mean.len(),
            scaler.scale.len()
        )));
    }
    Ok(())
}

/// Directory-backed artifact store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn bundle_files() -> [&'static str; 3] {
        [MODEL_FILE, SCALER_FILE, FEATURES_FILE]
    }

    /// Presence of each blob, in model, scaler, features order
    pub fn presence(&self) -> [bool; 3] {
        Self::bundle_files().map(|file| self.path(file).is_file())
    }

    /// True when all three blobs are present
    pub fn exists(&self) -> bool {
        self.presence().iter().all(|&present| present)
    }

    /// Persist the three blobs under a fresh bundle id.
    ///
    /// Everything is serialized before the first byte is written; each blob
    /// then goes to a `.tmp` sibling and is renamed into place.
    pub fn save(
        &self,
        model: &ModelArtifact,
        scaler: &ScalerState,
        schema: &FeatureSchema,
    ) -> Result<Uuid> {
        check_consistency(model, scaler, schema)?;

        let bundle_id = Uuid::new_v4();
        let blobs = [
            (MODEL_FILE, encode(bundle_id, model)?),
            (SCALER_FILE, encode(bundle_id, scaler)?),
            (FEATURES_FILE, encode(bundle_id, schema)?),
        ];

        std::fs::create_dir_all(&self.dir)?;

        let mut staged = Vec::with_capacity(blobs.len());
        for (file, bytes) in &blobs {
            let tmp = self.path(&format!("{}.tmp", file));
            std::fs::write(&tmp, bytes)?;
            staged.push((tmp, self.path(file)));
        }
        for (tmp, target) in staged {
            std::fs::rename(&tmp, &target)?;
            debug!(path = %target.display(), "Artifact written");
        }

        info!(
            bundle_id = %bundle_id,
            dir = %self.dir.display(),
            "Artifacts saved"
        );
        Ok(bundle_id)
    }

    /// Load and cross-check the three blobs
    pub fn load(&self) -> Result<ArtifactBundle> {
        let missing: Vec<String> = Self::bundle_files()
            .iter()
            .zip(self.presence())
            .filter(|(_, present)| !present)
            .map(|(file, _)| file.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::ArtifactNotFound(missing));
        }

        let model: Envelope<ModelArtifact> = self.decode(MODEL_FILE)?;
        let scaler: Envelope<ScalerState> = self.decode(SCALER_FILE)?;
        let schema: Envelope<FeatureSchema> = self.decode(FEATURES_FILE)?;

        if model.bundle_id != scaler.bundle_id || model.bundle_id != schema.bundle_id {
            return Err(AppError::ArtifactCorrupt(format!(
                "blobs belong to different bundles: model {}, scaler {}, features {}",
                model.bundle_id, scaler.bundle_id, schema.bundle_id
            )));
        }

        let bundle = ArtifactBundle {
            bundle_id: model.bundle_id,
            model: model.payload,
            scaler: scaler.payload,
            schema: schema.payload,
        };
        bundle.validate()?;

        info!(
            bundle_id = %bundle.bundle_id,
            features = bundle.schema.len(),
            "Artifacts loaded"
        );
        Ok(bundle)
    }

    /// Write the evaluation report next to the bundle. Not part of the bundle.
    pub fn save_report(&self, report: &EvaluationReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(REPORT_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(report)?)?;
        Ok(path)
    }

    fn decode<T: DeserializeOwned>(&self, file: &str) -> Result<Envelope<T>> {
        let bytes = std::fs::read(self.path(file))?;
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::ArtifactCorrupt(format!("{}: {}", file, e)))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(AppError::ArtifactCorrupt(format!(
                "{}: unsupported format version {}",
                file, envelope.format_version
            )));
        }
        Ok(envelope)
    }
}

fn encode<T: Serialize>(bundle_id: Uuid, payload: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        bundle_id,
        payload,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}
