//! Candidate specifications, fitted models and the trained model artifact

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use super::boosting::BoostedModel;
use super::calibration::{CalibrationStatus, IsotonicCalibrator};
use super::linear::LogisticModel;
use super::metrics::{rank_importance, FeatureImportance};
use crate::{Result, SeasonId};

/// Why a single candidate could not be fitted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("empty or misaligned training set")]
    EmptyTrainingSet,

    #[error("non-finite loss or score at step {epoch}")]
    NonFinite { epoch: usize },

    #[error("did not converge within {epochs} epochs (last loss {loss:.6})")]
    NotConverged { epochs: usize, loss: f64 },

    #[error("fit backend unavailable: {0}")]
    Backend(String),
}

/// Model family and its own hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelFamily {
    Logistic { l2: f64 },
    Boosted { rounds: usize, depth: usize },
}

/// One point of the hyperparameter grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub family: ModelFamily,
    /// Per-season sample weight decay (1.0 = none)
    pub weight_decay: f64,
}

impl fmt::Display for CandidateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.family {
            ModelFamily::Logistic { l2 } => {
                write!(f, "logistic(l2={}, decay={})", l2, self.weight_decay)
            }
            ModelFamily::Boosted { rounds, depth } => write!(
                f,
                "boosted(rounds={}, depth={}, decay={})",
                rounds, depth, self.weight_decay
            ),
        }
    }
}

/// A fitted classifier of either family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum FittedModel {
    Logistic(LogisticModel),
    Boosted(BoostedModel),
}

impl FittedModel {
    /// Home-win probability for one row
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            FittedModel::Logistic(m) => m.predict_proba(row),
            FittedModel::Boosted(m) => m.predict_proba(row),
        }
    }

    pub fn predict_all(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_proba(r)).collect()
    }

    /// Standardized coefficients (logistic) or normalized split gain (boosted)
    pub fn importance(&self, feature_names: &[String]) -> Vec<FeatureImportance> {
        match self {
            FittedModel::Logistic(m) => rank_importance(feature_names, m.coefficients()),
            FittedModel::Boosted(m) => rank_importance(feature_names, &m.importance),
        }
    }
}

/// The selected model with everything needed to reproduce and serve it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub version: String,
    pub model: FittedModel,
    pub calibrator: Option<IsotonicCalibrator>,
    pub calibration: CalibrationStatus,
    /// Exact column order the model expects
    pub feature_names: Vec<String>,
    pub train_seasons: Vec<SeasonId>,
    pub validation_season: SeasonId,
    pub candidate: CandidateSpec,
    pub dataset_fingerprint: String,
}

impl TrainedModel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: FittedModel,
        calibrator: Option<IsotonicCalibrator>,
        calibration: CalibrationStatus,
        feature_names: Vec<String>,
        train_seasons: Vec<SeasonId>,
        validation_season: SeasonId,
        candidate: CandidateSpec,
        dataset_fingerprint: String,
    ) -> Result<Self> {
        let version = model_version(&feature_names, &train_seasons, &candidate, &dataset_fingerprint)?;
        Ok(TrainedModel {
            version,
            model,
            calibrator,
            calibration,
            feature_names,
            train_seasons,
            validation_season,
            candidate,
            dataset_fingerprint,
        })
    }

    pub fn predict_raw(&self, row: &[f64]) -> f64 {
        self.model.predict_proba(row)
    }

    /// Calibrated probability when a calibrator was fitted, raw otherwise
    pub fn predict(&self, row: &[f64]) -> f64 {
        let raw = self.predict_raw(row);
        match &self.calibrator {
            Some(c) => c.calibrate(raw),
            None => raw,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Short hash of feature set, training seasons and hyperparameters
fn model_version(
    feature_names: &[String],
    train_seasons: &[SeasonId],
    candidate: &CandidateSpec,
    dataset_fingerprint: &str,
) -> Result<String> {
    let mut hasher = Sha256::new();
    for name in feature_names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    for season in train_seasons {
        hasher.update(season.to_string().as_bytes());
    }
    hasher.update(serde_json::to_vec(candidate)?);
    hasher.update(dataset_fingerprint.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    Ok(digest[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::linear::Standardizer;

    fn logistic() -> FittedModel {
        FittedModel::Logistic(LogisticModel {
            standardizer: Standardizer {
                mean: vec![0.0, 0.0],
                std: vec![1.0, 1.0],
            },
            weights: vec![2.0, -0.5],
            bias: 0.0,
            epochs: 10,
            final_loss: 0.5,
        })
    }

    fn spec(l2: f64) -> CandidateSpec {
        CandidateSpec {
            family: ModelFamily::Logistic { l2 },
            weight_decay: 1.0,
        }
    }

    fn trained(l2: f64) -> TrainedModel {
        TrainedModel::new(
            logistic(),
            None,
            CalibrationStatus::Skipped {
                available: 0,
                required: 50,
                reason: "test".to_string(),
            },
            vec!["a_diff".to_string(), "b_diff".to_string()],
            vec![SeasonId::from_start_year(2021)],
            SeasonId::from_start_year(2022),
            spec(l2),
            "abc".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_version_tracks_hyperparameters() {
        assert_eq!(trained(0.1).version, trained(0.1).version);
        assert_ne!(trained(0.1).version, trained(0.01).version);
        assert_eq!(trained(0.1).version.len(), 16);
    }

    #[test]
    fn test_uncalibrated_predict_is_raw() {
        let model = trained(0.1);
        assert_eq!(model.predict(&[0.0, 0.0]), 0.5);
        assert_eq!(model.predict(&[1.0, 0.0]), model.predict_raw(&[1.0, 0.0]));
    }

    #[test]
    fn test_importance_ranked_by_magnitude() {
        let names = vec!["a_diff".to_string(), "b_diff".to_string()];
        let ranked = logistic().importance(&names);
        assert_eq!(ranked[0].feature, "a_diff");
        assert_eq!(ranked[1].value, -0.5);
    }

    #[test]
    fn test_json_roundtrip() {
        let model = trained(0.1);
        let json = serde_json::to_string(&model).unwrap();
        let back: TrainedModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, model.version);
        assert_eq!(back.feature_names, model.feature_names);
        assert_eq!(back.candidate, model.candidate);
    }

    #[test]
    fn test_candidate_display() {
        assert_eq!(spec(0.01).to_string(), "logistic(l2=0.01, decay=1)");
    }
}
