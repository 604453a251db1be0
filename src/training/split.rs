//! Chronological season split and recency sample weights

use serde::{Deserialize, Serialize};

use crate::{HockeyError, Result, SeasonId};

/// Assignment of seasons to train / validation / test roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonSplit {
    /// Ascending
    pub train: Vec<SeasonId>,
    pub validation: SeasonId,
    pub test: SeasonId,
}

impl SeasonSplit {
    /// Validate a split; without a validation season the latest training
    /// season takes that role
    pub fn new(
        train: Vec<SeasonId>,
        validation: Option<SeasonId>,
        test: SeasonId,
    ) -> Result<Self> {
        let mut train = train;
        train.sort_unstable();
        if let Some(dup) = train.windows(2).find(|w| w[0] == w[1]) {
            return Err(HockeyError::InvalidSplit(format!(
                "season {} listed twice for training",
                dup[0]
            )));
        }

        let validation = match validation {
            Some(season) => season,
            None => {
                if train.len() < 2 {
                    return Err(HockeyError::InvalidSplit(
                        "without --val-season at least two training seasons are needed".to_string(),
                    ));
                }
                let season = train.pop().ok_or_else(|| {
                    HockeyError::InvalidSplit("no training seasons".to_string())
                })?;
                log::info!("Using latest training season {} for validation", season);
                season
            }
        };

        let latest_train = *train
            .last()
            .ok_or_else(|| HockeyError::InvalidSplit("no training seasons".to_string()))?;

        if latest_train >= validation {
            return Err(HockeyError::InvalidSplit(format!(
                "validation season {} does not come after training season {}",
                validation, latest_train
            )));
        }
        if validation >= test {
            return Err(HockeyError::InvalidSplit(format!(
                "test season {} does not come after validation season {}",
                test, validation
            )));
        }

        Ok(SeasonSplit {
            train,
            validation,
            test,
        })
    }

    pub fn latest_train(&self) -> SeasonId {
        // Non-empty by construction
        self.train[self.train.len() - 1]
    }

    /// Every season the split touches, ascending
    pub fn all_seasons(&self) -> Vec<SeasonId> {
        let mut seasons = self.train.clone();
        seasons.push(self.validation);
        seasons.push(self.test);
        seasons
    }

    /// Per-row weights `decay^(seasons before the latest training season)`,
    /// normalized to mean 1
    pub fn recency_weights(&self, row_seasons: &[SeasonId], decay: f64) -> Vec<f64> {
        let latest = self.latest_train();
        let raw: Vec<f64> = row_seasons
            .iter()
            .map(|s| decay.powi(s.seasons_until(latest).max(0)))
            .collect();

        let total: f64 = raw.iter().sum();
        if raw.is_empty() || total <= 0.0 {
            return raw;
        }
        let scale = raw.len() as f64 / total;
        raw.into_iter().map(|w| w * scale).collect()
    }
}
