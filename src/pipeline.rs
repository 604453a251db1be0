//! End-to-end batch run
//!
//! A [`PipelineContext`] is built once per run from the configuration and a
//! validated season split, then handed by reference to each stage. Stages
//! return new values and never modify what an earlier stage produced.

use crate::data::{Dataset, DatasetBuilder, RawTeamGameRecord};
use crate::training::calibration::fit_calibration;
use crate::training::metrics::{EvaluationReport, Evaluator, MetricSummary, SeasonMetrics};
use crate::training::{ModelSelector, SeasonSplit, TrainedModel};
use crate::{Config, Result, SeasonId};

/// Immutable per-run state
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: Config,
    pub split: SeasonSplit,
}

/// Everything one run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub dataset: Dataset,
    pub model: TrainedModel,
    pub report: EvaluationReport,
}

impl PipelineContext {
    /// Validates the configuration; the split is already checked by construction
    pub fn new(config: Config, split: SeasonSplit) -> Result<Self> {
        config.validate()?;
        Ok(PipelineContext { config, split })
    }

    /// Builds the split from season lists, rejecting non-chronological ones
    pub fn from_seasons(
        config: Config,
        train: Vec<SeasonId>,
        validation: Option<SeasonId>,
        test: SeasonId,
    ) -> Result<Self> {
        let split = SeasonSplit::new(train, validation, test)?;
        Self::new(config, split)
    }

    /// Matchup dataset for every season the split touches
    pub fn build_dataset(&self, records: &[RawTeamGameRecord]) -> Result<Dataset> {
        DatasetBuilder::new(&self.config).build(records, &self.split.all_seasons())
    }

    pub fn run(&self, records: &[RawTeamGameRecord]) -> Result<PipelineOutput> {
        let dataset = self.build_dataset(records)?;
        let (model, report) = self.train(&dataset)?;
        Ok(PipelineOutput {
            dataset,
            model,
            report,
        })
    }

    /// Search, calibrate and evaluate on an already built dataset
    pub fn train(&self, dataset: &Dataset) -> Result<(TrainedModel, EvaluationReport)> {
        let split = &self.split;
        let train = dataset.select_seasons(&split.train);
        let validation = dataset.select_seasons(&[split.validation]);
        let test = dataset.select_seasons(&[split.test]);
        log::info!(
            "Split: train {:?} ({} games), validation {} ({}), test {} ({})",
            split.train.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            train.len(),
            split.validation,
            validation.len(),
            split.test,
            test.len()
        );

        let outcome = ModelSelector::new(&self.config.training).search(
            &train,
            &validation,
            &test,
            split,
        )?;
        let candidate = outcome.selected_result().spec.clone();

        let val_raw = outcome.model.predict_all(&validation.rows);
        let (calibrator, calibration) = fit_calibration(
            &val_raw,
            &validation.target,
            self.config.calibration.min_samples,
        );

        let model = TrainedModel::new(
            outcome.model,
            calibrator,
            calibration,
            dataset.feature_names.clone(),
            split.train.clone(),
            split.validation,
            candidate.clone(),
            dataset.fingerprint.clone(),
        )?;

        let evaluator = Evaluator::new(&self.config.evaluation);
        let test_raw: Vec<f64> = test.rows.iter().map(|r| model.predict_raw(r)).collect();
        let test_served: Vec<f64> = test.rows.iter().map(|r| model.predict(r)).collect();

        let validation_summary = evaluator.summarize(&val_raw, &validation.target);
        let test_summary = evaluator.summarize(&test_served, &test.target);
        let test_uncalibrated = evaluator.summarize(&test_raw, &test.target);

        log::info!("Validation: {}", validation_summary);
        log::info!("Test: {}", test_summary);

        // Threshold is tuned and applied on raw probabilities; the
        // calibrator was fitted on the same validation rows
        let threshold =
            evaluator.threshold(&val_raw, &validation.target, &test_raw, &test.target);

        let by_season = vec![
            season_metrics(split.validation, "validation", &val_raw, &validation.target),
            season_metrics(split.test, "test", &test_served, &test.target),
        ];

        let report = EvaluationReport {
            model_version: model.version.clone(),
            candidate,
            dataset_fingerprint: dataset.fingerprint.clone(),
            validation: validation_summary,
            test: test_summary,
            test_uncalibrated,
            calibration: model.calibration.clone(),
            threshold,
            confidence_buckets: evaluator.buckets(&test_served, &test.target),
            feature_importance: model.model.importance(&model.feature_names),
            by_season,
            candidates: outcome.results,
        };

        Ok((model, report))
    }
}

fn season_metrics(season: SeasonId, role: &str, probs: &[f64], labels: &[f64]) -> SeasonMetrics {
    SeasonMetrics {
        season,
        role: role.to_string(),
        metrics: MetricSummary::compute(probs, labels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticLeague;
    use crate::{HockeyError, TrainingConfig};

    fn s(year: u16) -> SeasonId {
        SeasonId::from_start_year(year)
    }

    fn small_config() -> Config {
        let mut config = Config::default();
        config.training = TrainingConfig {
            regularization_candidates: vec![0.01],
            weight_decay_candidates: vec![1.0],
            boosting_rounds: vec![30],
            boosting_depths: vec![2],
            ..TrainingConfig::default()
        };
        config
    }

    fn league() -> Vec<RawTeamGameRecord> {
        let mut league = SyntheticLeague::new(3, 10, 40, 2024);
        league.strength_spread = 1.0;
        league.generate().unwrap()
    }

    #[test]
    fn test_validation_before_training_rejected() {
        let err = PipelineContext::from_seasons(
            small_config(),
            vec![s(2022)],
            Some(s(2021)),
            s(2023),
        )
        .unwrap_err();
        assert!(matches!(err, HockeyError::InvalidSplit(_)));

        let err = PipelineContext::from_seasons(
            small_config(),
            vec![s(2021), s(2023)],
            Some(s(2022)),
            s(2024),
        )
        .unwrap_err();
        assert!(matches!(err, HockeyError::InvalidSplit(_)));
    }

    #[test]
    fn test_end_to_end_beats_home_baseline() {
        let records = league();
        let ctx =
            PipelineContext::from_seasons(small_config(), vec![s(2021), s(2022)], None, s(2023))
                .unwrap();
        assert_eq!(ctx.split.train, vec![s(2021)]);
        assert_eq!(ctx.split.validation, s(2022));

        let output = ctx.run(&records).unwrap();
        let report = &output.report;

        assert_eq!(report.test.n, 200);
        assert!(
            report.test.accuracy > report.test.home_win_rate,
            "accuracy {} vs home rate {}",
            report.test.accuracy,
            report.test.home_win_rate
        );
        assert!(report.test.roc_auc.unwrap_or(0.0) > 0.5);

        assert_eq!(report.model_version, output.model.version);
        assert_eq!(report.dataset_fingerprint, output.dataset.fingerprint);
        assert_eq!(output.model.feature_names, output.dataset.feature_names);
        assert_eq!(report.by_season.len(), 2);
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.feature_importance.len(), output.dataset.n_features());
        let bucketed: usize = report.confidence_buckets.iter().map(|b| b.count).sum();
        assert_eq!(bucketed, 200);
        // 200 validation games clears the default minimum
        assert!(report.calibration.is_applied());
    }

    #[test]
    fn test_default_grid_beats_home_rate_across_seeds() {
        let (mut n, mut correct, mut home_wins) = (0.0, 0.0, 0.0);
        let (mut brier, mut baseline) = (0.0, 0.0);
        for seed in [1, 7, 99] {
            let mut league = SyntheticLeague::new(3, 12, 50, seed);
            league.strength_spread = 0.8;
            let records = league.generate().unwrap();
            let ctx = PipelineContext::from_seasons(
                Config::default(),
                vec![s(2021)],
                Some(s(2022)),
                s(2023),
            )
            .unwrap();
            let test = ctx.run(&records).unwrap().report.test;
            assert!(test.roc_auc.unwrap_or(0.0) > 0.5, "seed {}", seed);

            let size = test.n as f64;
            let h = test.home_win_rate;
            n += size;
            correct += test.accuracy * size;
            home_wins += h * size;
            brier += test.brier * size;
            // Constant prediction at the test season's own home rate
            baseline += h * (1.0 - h) * size;
        }
        assert!(correct / n > home_wins / n, "accuracy {} vs home rate {}", correct / n, home_wins / n);
        assert!(brier / n < baseline / n, "brier {} vs baseline {}", brier / n, baseline / n);
    }

    #[test]
    fn test_default_config_is_deterministic() {
        let records = SyntheticLeague::new(3, 12, 50, 7).generate().unwrap();
        let ctx = PipelineContext::from_seasons(
            Config::default(),
            vec![s(2021)],
            Some(s(2022)),
            s(2023),
        )
        .unwrap();

        let a = ctx.run(&records).unwrap();
        let b = ctx.run(&records).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(
            serde_json::to_string(&a.report).unwrap(),
            serde_json::to_string(&b.report).unwrap()
        );
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let records = league();
        let ctx = PipelineContext::from_seasons(
            small_config(),
            vec![s(2021)],
            Some(s(2022)),
            s(2023),
        )
        .unwrap();

        let a = ctx.run(&records).unwrap();
        let b = ctx.run(&records).unwrap();
        assert_eq!(a.dataset, b.dataset);
        assert_eq!(
            serde_json::to_string(&a.report).unwrap(),
            serde_json::to_string(&b.report).unwrap()
        );
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn test_missing_test_season_rows() {
        let records = league();
        let ctx = PipelineContext::from_seasons(
            small_config(),
            vec![s(2021)],
            Some(s(2022)),
            s(2025),
        )
        .unwrap();
        let dataset = ctx.build_dataset(&records).unwrap();
        assert!(matches!(
            ctx.train(&dataset).unwrap_err(),
            HockeyError::EmptyDataset(_)
        ));
    }
}
