use crate::config::TrainingConfig;
use crate::error::{AppError, Result};
use crate::ml::classifier::{fit, Classifier, Hyperparameters, LinearModel, Penalty, Solver};
use crate::ml::data::Label;
use crate::ml::metrics::roc_auc;
use crate::ml::models::{CandidateResult, TrainingReport};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Hyperparameter search space
#[derive(Debug, Clone)]
pub struct ParamGrid {
    pub c_values: Vec<f64>,
    pub penalties: Vec<Penalty>,
    pub solvers: Vec<Solver>,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            c_values: vec![0.001, 0.01, 0.1, 1.0, 10.0, 100.0],
            penalties: vec![Penalty::L1, Penalty::L2],
            solvers: vec![Solver::GradientDescent, Solver::ProximalGradient],
            max_iter: 1000,
            tolerance: 1e-4,
        }
    }
}

impl ParamGrid {
    /// A grid holding exactly one point
    pub fn single(params: Hyperparameters) -> Self {
        Self {
            c_values: vec![params.c],
            penalties: vec![params.penalty],
            solvers: vec![params.solver],
            max_iter: params.max_iter,
            tolerance: params.tolerance,
        }
    }

    /// Cartesian product in C, penalty, solver order; incompatible pairs are
    /// left out rather than attempted
    pub fn candidates(&self) -> Vec<Hyperparameters> {
        let mut out = Vec::new();
        for &c in &self.c_values {
            for &penalty in &self.penalties {
                for &solver in &self.solvers {
                    if !solver.supports(penalty) {
                        continue;
                    }
                    out.push(Hyperparameters {
                        c,
                        penalty,
                        solver,
                        max_iter: self.max_iter,
                        tolerance: self.tolerance,
                    });
                }
            }
        }
        out
    }
}

/// Validation-fold row indices for stratified k-fold.
///
/// Each class's rows, in input order, are cut into `k` contiguous chunks
/// whose sizes differ by at most one; fold `i` takes chunk `i` of every class.
pub fn stratified_folds(y: ArrayView1<Label>, k: usize) -> Result<Vec<Vec<usize>>> {
    if k < 2 {
        return Err(AppError::Validation(format!(
            "cross-validation needs at least 2 folds, got {}",
            k
        )));
    }

    let mut folds = vec![Vec::new(); k];
    for class in [0, 1] {
        let members: Vec<usize> = y
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == class)
            .map(|(i, _)| i)
            .collect();
        if members.len() < k {
            return Err(AppError::InsufficientData(format!(
                "class {} has {} rows, fewer than {} folds",
                class,
                members.len(),
                k
            )));
        }

        let base = members.len() / k;
        let extra = members.len() % k;
        let mut start = 0;
        for (i, fold) in folds.iter_mut().enumerate() {
            let size = base + usize::from(i < extra);
            fold.extend_from_slice(&members[start..start + size]);
            start += size;
        }
    }

    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(folds)
}

struct Fold {
    x_train: Array2<f64>,
    y_train: Array1<Label>,
    x_val: Array2<f64>,
    y_val: Array1<Label>,
}

/// Cross-validated grid search over a bounded worker pool
pub struct GridSearch {
    candidates: Vec<Hyperparameters>,
    folds: usize,
    workers: usize,
}

impl GridSearch {
    pub fn new(grid: &ParamGrid, folds: usize, workers: usize) -> Result<Self> {
        let candidates = grid.candidates();
        if candidates.is_empty() {
            return Err(AppError::InvalidHyperparameter(
                "parameter grid has no compatible candidates".to_string(),
            ));
        }
        for candidate in &candidates {
            candidate.validate()?;
        }
        Ok(Self {
            candidates,
            folds,
            workers,
        })
    }

    pub fn candidates(&self) -> &[Hyperparameters] {
        &self.candidates
    }

    /// Score every candidate; returns the index of the winner and all results.
    ///
    /// Each (candidate, fold) pair is an independent task. Results come back
    /// in task order and are aggregated only once every task has finished.
    /// A later candidate replaces the incumbent only with a strictly higher
    /// mean score.
    pub fn run(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<Label>,
    ) -> Result<(usize, Vec<CandidateResult>)> {
        let folds: Vec<Fold> = stratified_folds(y, self.folds)?
            .into_iter()
            .map(|val_idx| {
                let mut is_val = vec![false; y.len()];
                for &i in &val_idx {
                    is_val[i] = true;
                }
                let train_idx: Vec<usize> = (0..y.len()).filter(|&i| !is_val[i]).collect();
                Fold {
                    x_train: x.select(Axis(0), &train_idx),
                    y_train: y.select(Axis(0), &train_idx),
                    x_val: x.select(Axis(0), &val_idx),
                    y_val: y.select(Axis(0), &val_idx),
                }
            })
            .collect();

        let tasks: Vec<(usize, usize)> = (0..self.candidates.len())
            .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("grid-search-{}", i))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build worker pool: {}", e)))?;

        info!(
            candidates = self.candidates.len(),
            folds = folds.len(),
            workers = pool.current_num_threads(),
            "Starting grid search"
        );
        let started = Instant::now();

        let scores: Vec<(f64, bool)> = pool.install(|| {
            tasks
                .par_iter()
                .map(|&(c, f)| -> Result<(f64, bool)> {
                    let fold = &folds[f];
                    let outcome = fit(fold.x_train.view(), fold.y_train.view(), &self.candidates[c])?;
                    let proba = outcome.model.predict_proba(fold.x_val.view())?;
                    let auc = roc_auc(fold.y_val.view(), proba.view())?;
                    crate::metrics::GRID_SEARCH_FITS.inc();
                    Ok((auc, outcome.converged))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let results: Vec<CandidateResult> = self
            .candidates
            .iter()
            .zip(scores.chunks(folds.len()))
            .map(|(params, chunk)| {
                let fold_scores: Vec<f64> = chunk.iter().map(|(s, _)| *s).collect();
                let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
                debug!(params = %params, mean_score, "Candidate scored");
                CandidateResult {
                    hyperparameters: *params,
                    mean_score,
                    fold_scores,
                    unconverged_folds: chunk.iter().filter(|(_, converged)| !converged).count(),
                }
            })
            .collect();

        let mut best = 0;
        for (i, result) in results.iter().enumerate().skip(1) {
            if result.mean_score > results[best].mean_score {
                best = i;
            }
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Grid search finished"
        );
        Ok((best, results))
    }
}

/// Fits the final classifier, with or without tuning
#[derive(Debug, Clone)]
pub struct Trainer {
    defaults: Hyperparameters,
    grid: ParamGrid,
    cv_folds: usize,
    workers: usize,
}

impl Default for Trainer {
    fn default() -> Self {
        Self {
            defaults: Hyperparameters::default(),
            grid: ParamGrid::default(),
            cv_folds: 5,
            workers: 0,
        }
    }
}

impl Trainer {
    pub fn new(defaults: Hyperparameters, grid: ParamGrid, cv_folds: usize, workers: usize) -> Self {
        Self {
            defaults,
            grid,
            cv_folds,
            workers,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        let defaults = Hyperparameters {
            c: config.default_c,
            max_iter: config.max_iter,
            tolerance: config.tolerance,
            ..Hyperparameters::default()
        };
        let grid = ParamGrid {
            c_values: config.c_grid.clone(),
            max_iter: config.max_iter,
            tolerance: config.tolerance,
            ..ParamGrid::default()
        };
        Self::new(defaults, grid, config.cv_folds, config.workers)
    }

    /// Train on the scaled training partition
    pub fn train(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<Label>,
        tune: bool,
    ) -> Result<(LinearModel, TrainingReport)> {
        let (params, cv_score, candidates) = if tune {
            let search = GridSearch::new(&self.grid, self.cv_folds, self.workers)?;
            let (best, results) = search.run(x, y)?;
            let winner = &results[best];
            info!(
                params = %winner.hyperparameters,
                cv_roc_auc = winner.mean_score,
                "Best hyperparameters selected"
            );
            (winner.hyperparameters, Some(winner.mean_score), results)
        } else {
            info!(params = %self.defaults, "Training with default hyperparameters");
            (self.defaults, None, Vec::new())
        };

        let outcome = fit(x, y, &params)?;
        if let Some(warning) = &outcome.warning {
            warn!("Final model: {}", warning);
        }

        let report = TrainingReport {
            hyperparameters: params,
            cv_score,
            candidates,
            converged: outcome.converged,
            iterations: outcome.iterations,
            warnings: outcome.warning.into_iter().collect(),
        };
        Ok((outcome.model, report))
    }
}
