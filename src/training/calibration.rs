//! Isotonic probability calibration
//!
//! Fitted with pool-adjacent-violators on validation predictions. Calibration
//! is skipped, explicitly, when the validation slice is too small or holds a
//! single class; the skip travels with the model and the report.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotone map from raw to calibrated probability
///
/// `centres` are the mean raw probabilities of the pooled blocks and
/// `values` their observed outcome rates. Prediction interpolates linearly
/// between centres and clamps outside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibrator {
    pub centres: Vec<f64>,
    pub values: Vec<f64>,
}

/// Whether calibration was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStatus {
    Applied {
        samples: usize,
        blocks: usize,
    },
    Skipped {
        available: usize,
        required: usize,
        reason: String,
    },
}

impl CalibrationStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, CalibrationStatus::Applied { .. })
    }
}

impl fmt::Display for CalibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationStatus::Applied { samples, blocks } => {
                write!(f, "isotonic on {} games, {} blocks", samples, blocks)
            }
            CalibrationStatus::Skipped {
                available,
                required,
                reason,
            } => write!(f, "skipped ({}; {} of {} games)", reason, available, required),
        }
    }
}

struct Block {
    sum_label: f64,
    sum_prob: f64,
    count: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum_label / self.count
    }
}

impl IsotonicCalibrator {
    /// Fit from raw probabilities and 0/1 outcomes
    pub fn fit(probs: &[f64], labels: &[f64]) -> Option<Self> {
        if probs.is_empty() || probs.len() != labels.len() {
            return None;
        }

        let mut pairs: Vec<(f64, f64)> = probs.iter().copied().zip(labels.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

        // Equal raw probabilities start in one block
        let mut blocks: Vec<Block> = Vec::with_capacity(pairs.len());
        for (p, y) in pairs {
            match blocks.last_mut() {
                Some(last) if last.sum_prob / last.count == p => {
                    last.sum_label += y;
                    last.sum_prob += p;
                    last.count += 1.0;
                }
                _ => blocks.push(Block {
                    sum_label: y,
                    sum_prob: p,
                    count: 1.0,
                }),
            }

            while blocks.len() >= 2 {
                let n = blocks.len();
                if blocks[n - 2].mean() <= blocks[n - 1].mean() {
                    break;
                }
                if let Some(top) = blocks.pop() {
                    if let Some(prev) = blocks.last_mut() {
                        prev.sum_label += top.sum_label;
                        prev.sum_prob += top.sum_prob;
                        prev.count += top.count;
                    }
                }
            }
        }

        Some(IsotonicCalibrator {
            centres: blocks.iter().map(|b| b.sum_prob / b.count).collect(),
            values: blocks.iter().map(|b| b.mean().clamp(0.0, 1.0)).collect(),
        })
    }

    pub fn calibrate(&self, raw: f64) -> f64 {
        let n = self.centres.len();
        if n == 0 || !raw.is_finite() {
            return raw;
        }
        if raw <= self.centres[0] {
            return self.values[0];
        }
        if raw >= self.centres[n - 1] {
            return self.values[n - 1];
        }

        let upper = self.centres.partition_point(|c| *c <= raw);
        let lower = upper - 1;
        let (x0, x1) = (self.centres[lower], self.centres[upper]);
        let (y0, y1) = (self.values[lower], self.values[upper]);
        y0 + (y1 - y0) * (raw - x0) / (x1 - x0)
    }
}

/// Fit a calibrator on validation predictions, or explain why not
pub fn fit_calibration(
    probs: &[f64],
    labels: &[f64],
    min_samples: usize,
) -> (Option<IsotonicCalibrator>, CalibrationStatus) {
    let available = probs.len();
    if available < min_samples {
        log::warn!(
            "Skipping calibration: {} validation games, {} required",
            available,
            min_samples
        );
        return (
            None,
            CalibrationStatus::Skipped {
                available,
                required: min_samples,
                reason: "too few validation games".to_string(),
            },
        );
    }

    let positives = labels.iter().filter(|y| **y >= 0.5).count();
    if positives == 0 || positives == available {
        log::warn!("Skipping calibration: validation outcomes are all one class");
        return (
            None,
            CalibrationStatus::Skipped {
                available,
                required: min_samples,
                reason: "single outcome class".to_string(),
            },
        );
    }

    match IsotonicCalibrator::fit(probs, labels) {
        Some(calibrator) => {
            let blocks = calibrator.centres.len();
            log::info!(
                "Fitted isotonic calibration on {} games ({} blocks)",
                available,
                blocks
            );
            (
                Some(calibrator),
                CalibrationStatus::Applied {
                    samples: available,
                    blocks,
                },
            )
        }
        None => (
            None,
            CalibrationStatus::Skipped {
                available,
                required: min_samples,
                reason: "predictions and outcomes misaligned".to_string(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pava_pools_violators() {
        let probs = vec![0.1, 0.2, 0.3, 0.4];
        let labels = vec![0.0, 1.0, 0.0, 1.0];
        let cal = IsotonicCalibrator::fit(&probs, &labels).unwrap();
        // 0.2 and 0.3 pool to 0.5
        assert_eq!(cal.values, vec![0.0, 0.5, 1.0]);
        assert_relative_eq!(cal.centres[1], 0.25);
    }

    #[test]
    fn test_output_is_monotone() {
        let probs: Vec<f64> = (0..50).map(|i| i as f64 / 50.0).collect();
        let labels: Vec<f64> = (0..50).map(|i| if (i * 7) % 10 < i / 5 { 1.0 } else { 0.0 }).collect();
        let cal = IsotonicCalibrator::fit(&probs, &labels).unwrap();
        assert!(cal.values.windows(2).all(|w| w[0] <= w[1]));

        let grid: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        let out: Vec<f64> = grid.iter().map(|p| cal.calibrate(*p)).collect();
        assert!(out.windows(2).all(|w| w[0] <= w[1] + 1e-12));
    }

    #[test]
    fn test_interpolates_and_clamps() {
        let cal = IsotonicCalibrator {
            centres: vec![0.2, 0.6],
            values: vec![0.1, 0.5],
        };
        assert_relative_eq!(cal.calibrate(0.4), 0.3);
        assert_eq!(cal.calibrate(0.0), 0.1);
        assert_eq!(cal.calibrate(0.9), 0.5);
    }

    #[test]
    fn test_skipped_below_minimum() {
        let (cal, status) = fit_calibration(&[0.4, 0.6], &[0.0, 1.0], 50);
        assert!(cal.is_none());
        assert_eq!(
            status,
            CalibrationStatus::Skipped {
                available: 2,
                required: 50,
                reason: "too few validation games".to_string(),
            }
        );
    }

    #[test]
    fn test_skipped_for_single_class() {
        let probs = vec![0.6; 10];
        let labels = vec![1.0; 10];
        let (cal, status) = fit_calibration(&probs, &labels, 5);
        assert!(cal.is_none());
        assert!(!status.is_applied());
        assert!(status.to_string().starts_with("skipped"));
    }

    #[test]
    fn test_applied() {
        let probs = vec![0.2, 0.4, 0.6, 0.8];
        let labels = vec![0.0, 0.0, 1.0, 1.0];
        let (cal, status) = fit_calibration(&probs, &labels, 4);
        assert!(cal.is_some());
        assert_eq!(status, CalibrationStatus::Applied { samples: 4, blocks: 4 });
    }
}
