//! Model training
//!
//! Chronological splits, candidate model families, selection on the
//! validation season, calibration and evaluation metrics.

pub mod boosting;
pub mod calibration;
pub mod linear;
pub mod metrics;
pub mod model;
pub mod selector;
pub mod split;

pub use calibration::{fit_calibration, CalibrationStatus, IsotonicCalibrator};
pub use metrics::{EvaluationReport, Evaluator, MetricSummary};
pub use model::{CandidateSpec, FitError, FittedModel, ModelFamily, TrainedModel};
pub use selector::{select_best, CandidateResult, CandidateStatus, ModelSelector};
pub use split::SeasonSplit;
