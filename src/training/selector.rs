//! Hyperparameter search and model selection on the validation season

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::boosting::{fit_boosted, BoostingConfig};
use super::linear::{LogisticConfig, LogisticTrainer};
use super::metrics::MetricSummary;
use super::model::{CandidateSpec, FitError, FittedModel, ModelFamily};
use super::split::SeasonSplit;
use crate::data::Dataset;
use crate::{HockeyError, Result, TrainingConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateStatus {
    Fitted,
    Failed { reason: String },
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateStatus::Fitted => write!(f, "fitted"),
            CandidateStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Outcome of one grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub spec: CandidateSpec,
    pub status: CandidateStatus,
    pub validation: Option<MetricSummary>,
    /// Recorded for transparency, never read by selection
    pub test: Option<MetricSummary>,
}

impl CandidateResult {
    pub fn failed(spec: CandidateSpec, error: &FitError) -> Self {
        CandidateResult {
            spec,
            status: CandidateStatus::Failed {
                reason: error.to_string(),
            },
            validation: None,
            test: None,
        }
    }
}

/// Search results with the selected model
pub struct SearchOutcome {
    pub results: Vec<CandidateResult>,
    pub selected: usize,
    pub model: FittedModel,
}

impl SearchOutcome {
    pub fn selected_result(&self) -> &CandidateResult {
        &self.results[self.selected]
    }
}

/// Index of the best fitted candidate: lowest validation log loss, then
/// higher validation accuracy, then earliest in the grid
pub fn select_best(results: &[CandidateResult]) -> Option<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.status == CandidateStatus::Fitted)
        .filter_map(|(i, r)| r.validation.as_ref().map(|v| (i, v)))
        .filter(|(_, v)| v.log_loss.is_finite())
        .min_by(|(ia, a), (ib, b)| {
            a.log_loss
                .total_cmp(&b.log_loss)
                .then_with(|| b.accuracy.total_cmp(&a.accuracy))
                .then_with(|| ia.cmp(ib))
        })
        .map(|(i, _)| i)
}

pub struct ModelSelector {
    config: TrainingConfig,
}

impl ModelSelector {
    pub fn new(config: &TrainingConfig) -> Self {
        ModelSelector {
            config: config.clone(),
        }
    }

    /// Candidate grid in a fixed order: logistic penalties, then boosted
    /// shapes, each crossed with every weight decay
    pub fn grid(&self) -> Vec<CandidateSpec> {
        let mut families: Vec<ModelFamily> = self
            .config
            .regularization_candidates
            .iter()
            .map(|l2| ModelFamily::Logistic { l2: *l2 })
            .collect();
        for rounds in &self.config.boosting_rounds {
            for depth in &self.config.boosting_depths {
                families.push(ModelFamily::Boosted {
                    rounds: *rounds,
                    depth: *depth,
                });
            }
        }

        families
            .into_iter()
            .flat_map(|family| {
                self.config
                    .weight_decay_candidates
                    .iter()
                    .map(move |decay| CandidateSpec {
                        family: family.clone(),
                        weight_decay: *decay,
                    })
            })
            .collect()
    }

    /// Fit every candidate on train, score on validation and test, pick on validation
    pub fn search(
        &self,
        train: &Dataset,
        validation: &Dataset,
        test: &Dataset,
        split: &SeasonSplit,
    ) -> Result<SearchOutcome> {
        for (role, slice) in [("train", train), ("validation", validation), ("test", test)] {
            if slice.is_empty() {
                return Err(HockeyError::EmptyDataset(format!("no {} rows", role)));
            }
        }

        let grid = self.grid();
        log::info!(
            "Searching {} candidates on {} train / {} validation rows",
            grid.len(),
            train.len(),
            validation.len()
        );

        let row_seasons: Vec<_> = train.games.iter().map(|g| g.season).collect();

        let fitted: Vec<(CandidateResult, Option<FittedModel>)> = grid
            .into_par_iter()
            .map(|spec| {
                let weights = split.recency_weights(&row_seasons, spec.weight_decay);
                match self.fit_candidate(&spec, train, &weights) {
                    Ok(model) => {
                        let val = MetricSummary::compute(
                            &model.predict_all(&validation.rows),
                            &validation.target,
                        );
                        let tst =
                            MetricSummary::compute(&model.predict_all(&test.rows), &test.target);
                        log::debug!(
                            "{}: val logloss {:.4} acc {:.3}",
                            spec,
                            val.log_loss,
                            val.accuracy
                        );
                        let result = CandidateResult {
                            spec,
                            status: CandidateStatus::Fitted,
                            validation: Some(val),
                            test: Some(tst),
                        };
                        (result, Some(model))
                    }
                    Err(e) => {
                        log::warn!("Candidate {} failed: {}", spec, e);
                        (CandidateResult::failed(spec, &e), None)
                    }
                }
            })
            .collect();

        let (results, mut models): (Vec<_>, Vec<_>) = fitted.into_iter().unzip();
        let selected = select_best(&results).ok_or(HockeyError::NoViableCandidate)?;
        let model = models[selected]
            .take()
            .ok_or(HockeyError::NoViableCandidate)?;

        log::info!("Selected {}", results[selected].spec);
        Ok(SearchOutcome {
            results,
            selected,
            model,
        })
    }

    fn fit_candidate(
        &self,
        spec: &CandidateSpec,
        train: &Dataset,
        weights: &[f64],
    ) -> std::result::Result<FittedModel, FitError> {
        match spec.family {
            ModelFamily::Logistic { l2 } => {
                let config = LogisticConfig {
                    l2,
                    learning_rate: self.config.learning_rate,
                    max_epochs: self.config.max_epochs,
                    tolerance: self.config.tolerance,
                    patience: self.config.patience,
                };
                LogisticTrainer::cpu()
                    .fit(&train.rows, &train.target, weights, &config)
                    .map(FittedModel::Logistic)
            }
            ModelFamily::Boosted { rounds, depth } => {
                let config = BoostingConfig {
                    rounds,
                    depth,
                    learning_rate: self.config.boosting_learning_rate,
                    min_child_weight: self.config.boosting_min_child_weight,
                    l2: self.config.boosting_l2,
                    bins: self.config.boosting_bins,
                };
                fit_boosted(&train.rows, &train.target, weights, &config).map(FittedModel::Boosted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetBuilder, SyntheticLeague};
    use crate::{Config, SeasonId};

    fn summary(log_loss: f64, accuracy: f64) -> MetricSummary {
        MetricSummary {
            log_loss,
            accuracy,
            ..MetricSummary::compute(&[0.6, 0.4], &[1.0, 0.0])
        }
    }

    fn result(l2: f64, val: (f64, f64), test: (f64, f64)) -> CandidateResult {
        CandidateResult {
            spec: CandidateSpec {
                family: ModelFamily::Logistic { l2 },
                weight_decay: 1.0,
            },
            status: CandidateStatus::Fitted,
            validation: Some(summary(val.0, val.1)),
            test: Some(summary(test.0, test.1)),
        }
    }

    #[test]
    fn test_selection_ignores_test_metrics() {
        // A wins on validation, B on test
        let a = result(0.1, (0.60, 0.60), (0.70, 0.50));
        let b = result(0.01, (0.65, 0.58), (0.55, 0.70));
        assert_eq!(select_best(&[b.clone(), a.clone()]), Some(1));
        assert_eq!(select_best(&[a, b]), Some(0));
    }

    #[test]
    fn test_ties_broken_by_accuracy_then_order() {
        let a = result(0.1, (0.60, 0.55), (0.6, 0.5));
        let b = result(0.2, (0.60, 0.58), (0.6, 0.5));
        let c = result(0.3, (0.60, 0.58), (0.6, 0.5));
        assert_eq!(select_best(&[a, b, c]), Some(1));
    }

    #[test]
    fn test_failed_candidates_excluded() {
        let spec = CandidateSpec {
            family: ModelFamily::Logistic { l2: 0.1 },
            weight_decay: 1.0,
        };
        let failed = CandidateResult::failed(
            spec,
            &FitError::NotConverged {
                epochs: 5,
                loss: 0.7,
            },
        );
        let ok = result(0.2, (0.9, 0.5), (0.9, 0.5));
        assert_eq!(select_best(&[failed.clone(), ok]), Some(1));
        assert_eq!(select_best(&[failed]), None);
    }

    #[test]
    fn test_grid_order() {
        let config = TrainingConfig {
            regularization_candidates: vec![0.1, 0.01],
            weight_decay_candidates: vec![1.0, 0.5],
            boosting_rounds: vec![10],
            boosting_depths: vec![2],
            ..TrainingConfig::default()
        };
        let grid = ModelSelector::new(&config).grid();
        let labels: Vec<String> = grid.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "logistic(l2=0.1, decay=1)",
                "logistic(l2=0.1, decay=0.5)",
                "logistic(l2=0.01, decay=1)",
                "logistic(l2=0.01, decay=0.5)",
                "boosted(rounds=10, depth=2, decay=1)",
                "boosted(rounds=10, depth=2, decay=0.5)",
            ]
        );
    }

    #[test]
    fn test_search_survives_failed_candidates() {
        let mut config = Config::default();
        config.training = TrainingConfig {
            regularization_candidates: vec![0.1],
            weight_decay_candidates: vec![1.0],
            max_epochs: 2,
            boosting_rounds: vec![10],
            boosting_depths: vec![2],
            ..TrainingConfig::default()
        };
        let records = SyntheticLeague::new(3, 6, 20, 11).generate().unwrap();
        let dataset = DatasetBuilder::new(&config).build(&records, &[]).unwrap();
        let split = SeasonSplit::new(
            vec![SeasonId::from_start_year(2021)],
            Some(SeasonId::from_start_year(2022)),
            SeasonId::from_start_year(2023),
        )
        .unwrap();

        let train = dataset.select_seasons(&split.train);
        let val = dataset.select_seasons(&[split.validation]);
        let test = dataset.select_seasons(&[split.test]);
        let outcome = ModelSelector::new(&config.training)
            .search(&train, &val, &test, &split)
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert!(matches!(
            outcome.results[0].status,
            CandidateStatus::Failed { .. }
        ));
        assert_eq!(outcome.selected, 1);
        assert!(matches!(outcome.model, FittedModel::Boosted(_)));
        assert!(outcome.selected_result().test.is_some());
    }
}
