use crate::error::{AppError, Result};
use csv::ReaderBuilder;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Binary class label; 1 means the customer churned.
pub type Label = u8;

/// Raw tabular records as read from the source, label column included.
///
/// Missing cells are stored as NaN so they can be counted by
/// [`Dataset::quality_check`] before anything rejects them.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<String>,
    values: Array2<f64>,
    label_column: String,
}

/// Informational summary of data quality. Never fails, never mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_rows: usize,
    pub total_columns: usize,
    pub missing_values: usize,
    pub duplicate_rows: usize,
}

/// Ordered feature names fixed after data preparation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSchema(Vec<String>);

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 over the ordered names; any reordering changes it.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        for name in &self.0 {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Feature matrix with its schema, label removed.
#[derive(Debug, Clone)]
pub struct Features {
    pub schema: FeatureSchema,
    pub values: Array2<f64>,
}

/// Label vector aligned with [`Features`] rows.
#[derive(Debug, Clone)]
pub struct Labels(pub Array1<Label>);

impl Labels {
    pub fn positives(&self) -> usize {
        self.0.iter().filter(|&&y| y == 1).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Training side of a stratified split.
///
/// Only [`partition`] can build one, which is what keeps the scaler from
/// ever being fit on anything but training rows.
#[derive(Debug, Clone)]
pub struct TrainSplit {
    pub(crate) schema: FeatureSchema,
    pub(crate) features: Array2<f64>,
    pub(crate) labels: Array1<Label>,
    pub(crate) indices: Vec<usize>,
}

/// Held-out side of a stratified split.
#[derive(Debug, Clone)]
pub struct TestSplit {
    pub(crate) features: Array2<f64>,
    pub(crate) labels: Array1<Label>,
    pub(crate) indices: Vec<usize>,
}

impl TrainSplit {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<Label> {
        &self.labels
    }

    /// Row positions in the source dataset
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl TestSplit {
    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<Label> {
        &self.labels
    }

    /// Row positions in the source dataset
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl Dataset {
    /// Load a CSV file with a header row
    pub fn load(path: impl AsRef<Path>, label_column: &str) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading data from {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| {
            AppError::DataAccess(format!("cannot open {}: {}", path.display(), e))
        })?;
        let dataset = Self::from_reader(file, label_column)?;

        info!(
            rows = dataset.n_rows(),
            columns = dataset.columns.len(),
            "Data loaded successfully"
        );
        Ok(dataset)
    }

    /// Parse CSV from any reader. Empty cells become missing values.
    pub fn from_reader<R: Read>(reader: R, label_column: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if columns.is_empty() {
            return Err(AppError::DataAccess("CSV header is empty".to_string()));
        }
        check_unique_columns(&columns)?;

        let mut values = Vec::new();
        let mut n_rows = 0;

        for (row_idx, record) in reader.records().enumerate() {
            // Header is line 1
            let line = row_idx + 2;
            let record = record.map_err(|e| AppError::DataAccess(format!("line {}: {}", line, e)))?;

            if record.len() != columns.len() {
                return Err(AppError::DataAccess(format!(
                    "line {}: expected {} columns, found {}",
                    line,
                    columns.len(),
                    record.len()
                )));
            }

            for (col_idx, field) in record.iter().enumerate() {
                let value = if field.is_empty() {
                    f64::NAN
                } else {
                    field.parse::<f64>().map_err(|_| {
                        AppError::DataAccess(format!(
                            "line {}: column '{}' has unparsable value '{}'",
                            line, columns[col_idx], field
                        ))
                    })?
                };
                values.push(value);
            }
            n_rows += 1;
        }

        let values = Array2::from_shape_vec((n_rows, columns.len()), values)
            .map_err(|e| AppError::Internal(format!("Failed to build record matrix: {}", e)))?;

        Ok(Self {
            columns,
            values,
            label_column: label_column.to_string(),
        })
    }

    /// Build a dataset from already-parsed values
    pub fn from_parts(
        columns: Vec<String>,
        values: Array2<f64>,
        label_column: &str,
    ) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(AppError::DataAccess(format!(
                "{} column names for {} columns",
                columns.len(),
                values.ncols()
            )));
        }
        check_unique_columns(&columns)?;
        Ok(Self {
            columns,
            values,
            label_column: label_column.to_string(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    /// Count missing cells and rows identical to an earlier row
    pub fn quality_check(&self) -> QualityReport {
        let missing_values = self.values.iter().filter(|v| v.is_nan()).count();

        let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(self.n_rows());
        let mut duplicate_rows = 0;
        for row in self.values.rows() {
            // Parsing yields a single NaN bit pattern, so bit equality is row equality
            let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
            if !seen.insert(key) {
                duplicate_rows += 1;
            }
        }

        QualityReport {
            total_rows: self.n_rows(),
            total_columns: self.columns.len(),
            missing_values,
            duplicate_rows,
        }
    }

    /// Separate the label column from the feature columns
    pub fn split_features_label(&self) -> Result<(Features, Labels)> {
        let label_idx = self
            .columns
            .iter()
            .position(|c| c == &self.label_column)
            .ok_or_else(|| {
                AppError::Schema(format!("label column '{}' not found", self.label_column))
            })?;

        let mut labels = Vec::with_capacity(self.n_rows());
        for (row, value) in self.values.column(label_idx).iter().enumerate() {
            let label = match *value {
                v if v == 0.0 => 0,
                v if v == 1.0 => 1,
                v if v.is_nan() => {
                    return Err(AppError::Schema(format!(
                        "row {}: label '{}' is missing",
                        row, self.label_column
                    )))
                }
                v => {
                    return Err(AppError::Schema(format!(
                        "row {}: label '{}' must be 0 or 1, found {}",
                        row, self.label_column, v
                    )))
                }
            };
            labels.push(label);
        }

        let feature_idx: Vec<usize> = (0..self.columns.len()).filter(|&i| i != label_idx).collect();
        if feature_idx.is_empty() {
            return Err(AppError::Schema("dataset has no feature columns".to_string()));
        }
        let values = self.values.select(Axis(1), &feature_idx);
        let names: Vec<String> = feature_idx.iter().map(|&i| self.columns[i].clone()).collect();

        for (row, record) in values.rows().into_iter().enumerate() {
            if let Some(col) = record.iter().position(|v| v.is_nan()) {
                return Err(AppError::DataAccess(format!(
                    "row {}: feature '{}' is missing",
                    row, names[col]
                )));
            }
        }

        let labels = Labels(Array1::from_vec(labels));
        let positives = labels.positives();
        let total = labels.len().max(1) as f64;
        info!(
            n_samples = values.nrows(),
            n_features = names.len(),
            "Prepared features and target"
        );
        info!(
            "Target distribution: Not Churned (0): {} ({:.2}%), Churned (1): {} ({:.2}%)",
            labels.len() - positives,
            (labels.len() - positives) as f64 / total * 100.0,
            positives,
            positives as f64 / total * 100.0
        );

        Ok((
            Features {
                schema: FeatureSchema::new(names),
                values,
            },
            labels,
        ))
    }
}

/// Column names must be unique, label column included
fn check_unique_columns(columns: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    let mut duplicates: Vec<String> = Vec::new();
    for name in columns {
        if !seen.insert(name.as_str()) && !duplicates.contains(name) {
            duplicates.push(name.clone());
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(AppError::Schema(format!(
            "duplicate column name(s): {}",
            duplicates.join(", ")
        )))
    }
}

/// Stratified, seeded train/test split.
///
/// Rows are grouped by label, each group shuffled with one `StdRng` seeded
/// from `seed`, and `round(group_len * test_fraction)` rows of every group go
/// to the test side. The same inputs and seed always give the same split.
pub fn partition(
    features: &Features,
    labels: &Labels,
    test_fraction: f64,
    seed: u64,
) -> Result<(TrainSplit, TestSplit)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(AppError::Validation(format!(
            "test_fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }
    if features.values.nrows() != labels.len() {
        return Err(AppError::Schema(format!(
            "{} feature rows but {} labels",
            features.values.nrows(),
            labels.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train_idx = Vec::new();
    let mut test_idx = Vec::new();

    for class in [0, 1] {
        let mut group: Vec<usize> = labels
            .0
            .iter()
            .enumerate()
            .filter(|(_, &y)| y == class)
            .map(|(i, _)| i)
            .collect();
        group.shuffle(&mut rng);

        let n_test = (group.len() as f64 * test_fraction).round() as usize;
        debug!(class, size = group.len(), n_test, "Stratum split");
        test_idx.extend_from_slice(&group[..n_test]);
        train_idx.extend_from_slice(&group[n_test..]);
    }

    if train_idx.is_empty() || test_idx.is_empty() {
        return Err(AppError::InsufficientData(format!(
            "split of {} rows at test_fraction {} leaves an empty partition",
            labels.len(),
            test_fraction
        )));
    }

    // Interleave the classes
    train_idx.shuffle(&mut rng);
    test_idx.shuffle(&mut rng);

    let train = TrainSplit {
        schema: features.schema.clone(),
        features: features.values.select(Axis(0), &train_idx),
        labels: labels.0.select(Axis(0), &train_idx),
        indices: train_idx,
    };
    let test = TestSplit {
        features: features.values.select(Axis(0), &test_idx),
        labels: labels.0.select(Axis(0), &test_idx),
        indices: test_idx,
    };

    info!(
        "Training set size: {}, testing set size: {}",
        train.len(),
        test.len()
    );
    info!(
        "Churn rate in training set: {:.2}%, in testing set: {:.2}%",
        churn_rate(&train.labels) * 100.0,
        churn_rate(&test.labels) * 100.0
    );

    Ok((train, test))
}

fn churn_rate(labels: &Array1<Label>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    labels.iter().filter(|&&y| y == 1).count() as f64 / labels.len() as f64
}
