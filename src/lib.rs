//! Telecom customer churn prediction.
//!
//! Batch training (`ml::pipeline`) produces a model, scaler and feature
//! schema that the artifact store persists as one bundle; the HTTP service
//! (`api`) loads that bundle into a `serving::ServingContext` and scores
//! requests against it.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod serving;

pub use error::{AppError, ConvergenceWarning, Result};
