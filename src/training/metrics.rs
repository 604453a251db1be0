//! Evaluation metrics
//!
//! Everything here works from (predicted probability, true label) pairs,
//! plus feature values for importance, so it is independent of how the
//! model was trained.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::calibration::CalibrationStatus;
use super::model::CandidateSpec;
use super::selector::CandidateResult;
use crate::{EvaluationConfig, SeasonId};

const LOG_LOSS_EPS: f64 = 1e-15;

/// 2x2 confusion matrix with home win as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_pos: usize,
    pub false_pos: usize,
    pub true_neg: usize,
    pub false_neg: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(probs: &[f64], labels: &[f64], threshold: f64) -> Self {
        let mut m = ConfusionMatrix::default();
        for (p, y) in probs.iter().zip(labels) {
            match (*p >= threshold, *y >= 0.5) {
                (true, true) => m.true_pos += 1,
                (true, false) => m.false_pos += 1,
                (false, false) => m.true_neg += 1,
                (false, true) => m.false_neg += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_pos + self.false_pos + self.true_neg + self.false_neg
    }
}

/// Headline metrics for one slice of games
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub n: usize,
    /// At the 0.5 threshold
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
    /// Undefined when only one class is present
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
    /// Accuracy of always predicting a home win
    pub home_win_rate: f64,
}

impl MetricSummary {
    pub fn compute(probs: &[f64], labels: &[f64]) -> Self {
        let n = probs.len().min(labels.len());
        let (probs, labels) = (&probs[..n], &labels[..n]);
        MetricSummary {
            n,
            accuracy: accuracy_at(probs, labels, 0.5),
            log_loss: log_loss(probs, labels),
            brier: brier_score(probs, labels),
            roc_auc: roc_auc(probs, labels),
            confusion: ConfusionMatrix::from_predictions(probs, labels, 0.5),
            home_win_rate: mean(labels),
        }
    }
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} | Acc: {:.2}% | LogLoss: {:.4} | Brier: {:.4} | AUC: {} | Home rate: {:.2}%",
            self.n,
            self.accuracy * 100.0,
            self.log_loss,
            self.brier,
            self.roc_auc
                .map(|a| format!("{:.4}", a))
                .unwrap_or_else(|| "n/a".to_string()),
            self.home_win_rate * 100.0
        )
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn accuracy_at(probs: &[f64], labels: &[f64], threshold: f64) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let correct = probs
        .iter()
        .zip(labels)
        .filter(|(p, y)| (**p >= threshold) == (**y >= 0.5))
        .count();
    correct as f64 / probs.len() as f64
}

/// Mean negative log-likelihood with probabilities clamped away from 0 and 1
pub fn log_loss(probs: &[f64], labels: &[f64]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f64 = probs
        .iter()
        .zip(labels)
        .map(|(p, y)| {
            let p = p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / probs.len() as f64
}

pub fn brier_score(probs: &[f64], labels: &[f64]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    probs
        .iter()
        .zip(labels)
        .map(|(p, y)| (p - y).powi(2))
        .sum::<f64>()
        / probs.len() as f64
}

/// Rank-statistic ROC-AUC with average ranks for ties
pub fn roc_auc(probs: &[f64], labels: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|y| **y >= 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[a].total_cmp(&probs[b]));

    let mut ranks = vec![0.0; probs.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probs[order[j + 1]] == probs[order[i]] {
            j += 1;
        }
        // 1-based average rank of the tie group
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|(_, y)| **y >= 0.5)
        .map(|(r, _)| *r)
        .sum();
    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Accuracy-maximizing threshold on a fixed grid
///
/// Ties go to the threshold nearest 0.5, then to the lower one.
pub fn tune_threshold(probs: &[f64], labels: &[f64], step: f64) -> f64 {
    if probs.is_empty() || !(step > 0.0 && step < 0.5) {
        return 0.5;
    }
    let steps = (1.0 / step).round() as usize;
    let mut best: (f64, f64) = (0.5, accuracy_at(probs, labels, 0.5));

    for k in 1..steps {
        let t = k as f64 * step;
        let acc = accuracy_at(probs, labels, t);
        let closer = (t - 0.5).abs() < (best.0 - 0.5).abs();
        if acc > best.1 || (acc == best.1 && closer) {
            best = (t, acc);
        }
    }
    best.0
}

/// Accuracy of games whose confidence |p - 0.5| falls in [lower, upper)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub accuracy: Option<f64>,
    /// Mean predicted probability of the side picked
    pub mean_confidence: Option<f64>,
}

/// Bucket predictions by distance from 0.5; the last bucket includes its upper edge
pub fn confidence_buckets(probs: &[f64], labels: &[f64], edges: &[f64]) -> Vec<ConfidenceBucket> {
    if edges.len() < 2 {
        return Vec::new();
    }
    let last = edges.len() - 2;

    edges
        .windows(2)
        .enumerate()
        .map(|(b, w)| {
            let (lower, upper) = (w[0], w[1]);
            let mut count = 0usize;
            let mut correct = 0usize;
            let mut confidence = 0.0;

            for (p, y) in probs.iter().zip(labels) {
                let d = (p - 0.5).abs();
                let inside = d >= lower && (d < upper || (b == last && d <= upper));
                if inside {
                    count += 1;
                    if (*p >= 0.5) == (*y >= 0.5) {
                        correct += 1;
                    }
                    confidence += p.max(1.0 - p);
                }
            }

            ConfidenceBucket {
                lower,
                upper,
                count,
                accuracy: (count > 0).then(|| correct as f64 / count as f64),
                mean_confidence: (count > 0).then(|| confidence / count as f64),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    /// Signed coefficient or normalized gain
    pub value: f64,
}

/// Pair names with values and sort by magnitude, keeping column order on ties
pub fn rank_importance(feature_names: &[String], values: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = feature_names
        .iter()
        .zip(values)
        .map(|(name, v)| FeatureImportance {
            feature: name.clone(),
            value: *v,
        })
        .collect();
    ranked.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
    ranked
}

/// Threshold tuned on validation, applied to test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub threshold: f64,
    pub validation_accuracy: f64,
    pub test_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonMetrics {
    pub season: SeasonId,
    /// "validation" or "test"
    pub role: String,
    pub metrics: MetricSummary,
}

/// Everything reported about a trained model on held-out seasons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model_version: String,
    pub candidate: CandidateSpec,
    pub dataset_fingerprint: String,
    pub validation: MetricSummary,
    /// Calibrated when calibration was applied
    pub test: MetricSummary,
    pub test_uncalibrated: MetricSummary,
    pub calibration: CalibrationStatus,
    pub threshold: ThresholdReport,
    pub confidence_buckets: Vec<ConfidenceBucket>,
    pub feature_importance: Vec<FeatureImportance>,
    pub by_season: Vec<SeasonMetrics>,
    pub candidates: Vec<CandidateResult>,
}

/// Computes metric summaries with the configured buckets and threshold grid
pub struct Evaluator {
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(config: &EvaluationConfig) -> Self {
        Evaluator {
            config: config.clone(),
        }
    }

    pub fn summarize(&self, probs: &[f64], labels: &[f64]) -> MetricSummary {
        MetricSummary::compute(probs, labels)
    }

    pub fn buckets(&self, probs: &[f64], labels: &[f64]) -> Vec<ConfidenceBucket> {
        confidence_buckets(probs, labels, &self.config.confidence_edges)
    }

    pub fn threshold(
        &self,
        val_probs: &[f64],
        val_labels: &[f64],
        test_probs: &[f64],
        test_labels: &[f64],
    ) -> ThresholdReport {
        let threshold = tune_threshold(val_probs, val_labels, self.config.threshold_grid_step);
        ThresholdReport {
            threshold,
            validation_accuracy: accuracy_at(val_probs, val_labels, threshold),
            test_accuracy: accuracy_at(test_probs, test_labels, threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_accuracy_and_confusion() {
        let probs = vec![0.9, 0.6, 0.4, 0.2, 0.7];
        let labels = vec![1.0, 0.0, 0.0, 1.0, 1.0];
        let m = MetricSummary::compute(&probs, &labels);
        assert_relative_eq!(m.accuracy, 0.6);
        assert_eq!(
            m.confusion,
            ConfusionMatrix {
                true_pos: 2,
                false_pos: 1,
                true_neg: 1,
                false_neg: 1
            }
        );
        assert_eq!(m.confusion.total(), 5);
        assert_relative_eq!(m.home_win_rate, 0.6);
    }

    #[test]
    fn test_log_loss_and_brier() {
        assert_relative_eq!(log_loss(&[0.5, 0.5], &[1.0, 0.0]), std::f64::consts::LN_2);
        assert_relative_eq!(brier_score(&[1.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_relative_eq!(brier_score(&[0.5], &[1.0]), 0.25);
        // Clamped, so a confident miss is large but finite
        assert!(log_loss(&[0.0], &[1.0]).is_finite());
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &[0.0, 0.0, 1.0, 1.0]), Some(1.0));
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &[0.0, 0.0, 1.0, 1.0]), Some(0.0));
        // All tied scores give 0.5
        assert_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &[0.0, 1.0, 0.0, 1.0]), Some(0.5));
        assert_eq!(roc_auc(&[0.3, 0.7], &[1.0, 1.0]), None);
        assert_relative_eq!(
            roc_auc(&[0.1, 0.4, 0.35, 0.8], &[0.0, 0.0, 1.0, 1.0]).unwrap(),
            0.75
        );
    }

    #[test]
    fn test_tune_threshold() {
        let probs = vec![0.52, 0.55, 0.58, 0.65, 0.7];
        let labels = vec![0.0, 0.0, 0.0, 1.0, 1.0];
        let t = tune_threshold(&probs, &labels, 0.01);
        assert!(t > 0.58 && t <= 0.65);
        assert_relative_eq!(accuracy_at(&probs, &labels, t), 1.0);
        // Nothing to gain: keep 0.5
        assert_eq!(tune_threshold(&[0.9, 0.1], &[1.0, 0.0], 0.01), 0.5);
    }

    #[test]
    fn test_confidence_buckets() {
        let probs = vec![0.52, 0.4, 0.68, 0.95, 1.0];
        let labels = vec![1.0, 1.0, 1.0, 1.0, 1.0];
        let buckets = confidence_buckets(&probs, &labels, &[0.0, 0.05, 0.2, 0.5]);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[1].count, 2);
        assert_relative_eq!(buckets[1].accuracy.unwrap(), 0.5);
        // Upper edge belongs to the last bucket
        assert_eq!(buckets[2].count, 2);
        assert_relative_eq!(buckets[2].mean_confidence.unwrap(), 0.975);
    }

    #[test]
    fn test_empty_bucket() {
        let buckets = confidence_buckets(&[0.5], &[1.0], &[0.0, 0.1, 0.5]);
        assert_eq!(buckets[1].count, 0);
        assert_eq!(buckets[1].accuracy, None);
    }

    #[test]
    fn test_rank_importance() {
        let names: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let ranked = rank_importance(&names, &[0.1, -0.7, 0.3]);
        let order: Vec<&str> = ranked.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }
}
