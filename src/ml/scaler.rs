use crate::error::{AppError, Result};
use crate::ml::data::TrainSplit;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Handling of features whose training-partition variance is zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroVariancePolicy {
    /// Divide by 1.0 instead of 0.0; the feature becomes a constant zero
    #[default]
    UnitScale,
    /// Fail with a degenerate-feature error
    Reject,
}

/// Per-feature standardization learned from the training partition.
///
/// Read-only after fitting; the same state scales train, test and every
/// inference vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    /// Per-feature mean
    pub mean: Array1<f64>,

    /// Per-feature divisor (population standard deviation, or 1.0 for
    /// constant features)
    pub scale: Array1<f64>,

    /// Features that had zero variance at fit time
    #[serde(default)]
    pub constant_features: Vec<String>,

    /// Number of training rows the statistics were computed from
    pub n_samples_seen: usize,
}

impl ScalerState {
    /// Fit on the training partition.
    ///
    /// Only a [`TrainSplit`] is accepted; there is no way to hand the full
    /// dataset or the test partition to this function.
    pub fn fit(train: &TrainSplit, policy: ZeroVariancePolicy) -> Result<Self> {
        let x = train.features();
        let names = train.schema().names();

        if x.nrows() == 0 {
            return Err(AppError::InsufficientData(
                "cannot fit scaler on an empty partition".to_string(),
            ));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| AppError::Internal("mean of empty axis".to_string()))?;
        let std = x.std_axis(Axis(0), 0.0);

        let non_finite: Vec<String> = names
            .iter()
            .zip(mean.iter().zip(std.iter()))
            .filter(|(_, (m, s))| !m.is_finite() || !s.is_finite())
            .map(|(name, _)| name.clone())
            .collect();
        if !non_finite.is_empty() {
            return Err(AppError::DegenerateFeature(non_finite));
        }

        let constant_features: Vec<String> = names
            .iter()
            .zip(std.iter())
            .filter(|(_, &s)| s == 0.0)
            .map(|(name, _)| name.clone())
            .collect();

        if !constant_features.is_empty() {
            match policy {
                ZeroVariancePolicy::Reject => {
                    return Err(AppError::DegenerateFeature(constant_features));
                }
                ZeroVariancePolicy::UnitScale => {
                    warn!(
                        features = ?constant_features,
                        "Zero-variance features scaled by 1.0"
                    );
                }
            }
        }

        let scale = std.mapv(|s| if s == 0.0 { 1.0 } else { s });

        Ok(Self {
            mean,
            scale,
            constant_features,
            n_samples_seen: x.nrows(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// `(x - mean) / scale` for every row. Pure: the state is never updated.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(AppError::Schema(format!(
                "scaler fitted on {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        Ok((x - &self.mean) / &self.scale)
    }

    /// Scale a single vector already arranged in schema order
    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>> {
        if row.len() != self.n_features() {
            return Err(AppError::Schema(format!(
                "scaler fitted on {} features, got {}",
                self.n_features(),
                row.len()
            )));
        }
        Ok((&row - &self.mean) / &self.scale)
    }
}

/// Fit on the training partition and scale both partitions
pub fn fit_and_scale(
    train: &TrainSplit,
    test: &crate::ml::data::TestSplit,
    policy: ZeroVariancePolicy,
) -> Result<(ScalerState, Array2<f64>, Array2<f64>)> {
    let scaler = ScalerState::fit(train, policy)?;
    let train_scaled = scaler.transform(train.features())?;
    let test_scaled = scaler.transform(test.features())?;

    info!(
        mean = train_scaled.mean().unwrap_or(0.0),
        std = train_scaled.std(0.0),
        "Features scaled"
    );

    Ok((scaler, train_scaled, test_scaled))
}
