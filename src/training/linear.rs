//! Regularized logistic regression
//!
//! Trained with burn (single `Linear` layer, Adam, full batch) on z-scored
//! features; the fitted coefficients are copied out into a plain
//! serializable model so prediction needs no tensor backend.
//!
//! Fits are bit-reproducible. The intercept rides on a constant input column
//! so every gradient reduction is a matmul, the plateau check uses a loss
//! summed sequentially in f64, and the fit runs on a one-thread rayon pool.

use burn::backend::{Autodiff, NdArray};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};

use super::model::FitError;

/// Backend used for candidate fitting
pub type FitBackend = Autodiff<NdArray<f64>>;

/// Z-score parameters computed from training rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Standardizer {
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let dim = rows.first().map_or(0, |r| r.len());
        let n = rows.len().max(1) as f64;

        let mut sum = vec![0.0; dim];
        let mut sum_sq = vec![0.0; dim];
        for row in rows {
            for j in 0..dim {
                sum[j] += row[j];
                sum_sq[j] += row[j] * row[j];
            }
        }

        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
        let std: Vec<f64> = sum_sq
            .iter()
            .zip(mean.iter())
            .map(|(sq, m)| (sq / n - m * m).max(0.0).sqrt().max(0.001))
            .collect();

        Standardizer { mean, std }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LogisticConfig {
    /// L2 penalty on the coefficients (not the bias)
    pub l2: f64,
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub tolerance: f64,
    pub patience: usize,
}

/// Fitted logistic model over standardized features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub standardizer: Standardizer,
    /// One coefficient per standardized feature
    pub weights: Vec<f64>,
    pub bias: f64,
    pub epochs: usize,
    pub final_loss: f64,
}

impl LogisticModel {
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let z = self.standardizer.transform(row);
        let logit = self.bias + z.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>();
        1.0 / (1.0 + (-logit).exp())
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.weights
    }
}

/// Full-batch logistic trainer
pub struct LogisticTrainer<B: AutodiffBackend> {
    device: B::Device,
}

impl LogisticTrainer<FitBackend> {
    pub fn cpu() -> Self {
        LogisticTrainer {
            device: Default::default(),
        }
    }
}

impl<B: AutodiffBackend> LogisticTrainer<B> {
    pub fn new(device: B::Device) -> Self {
        LogisticTrainer { device }
    }

    /// Fit on weighted rows; stops once the loss plateaus
    pub fn fit(
        &self,
        rows: &[Vec<f64>],
        target: &[f64],
        weights: &[f64],
        config: &LogisticConfig,
    ) -> Result<LogisticModel, FitError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .map_err(|e| FitError::Backend(e.to_string()))?;
        pool.install(|| self.fit_sequential(rows, target, weights, config))
    }

    fn fit_sequential(
        &self,
        rows: &[Vec<f64>],
        target: &[f64],
        weights: &[f64],
        config: &LogisticConfig,
    ) -> Result<LogisticModel, FitError> {
        let n = rows.len();
        if n == 0 || target.len() != n || weights.len() != n {
            return Err(FitError::EmptyTrainingSet);
        }
        let dim = rows[0].len();
        let standardizer = Standardizer::from_rows(rows);

        let x: Vec<f64> = rows
            .iter()
            .flat_map(|r| {
                let mut z = standardizer.transform(r);
                z.push(1.0);
                z
            })
            .collect();
        let weight_sum: f64 = weights.iter().sum();

        let x = Tensor::<B, 2>::from_data(TensorData::new(x, [n, dim + 1]), &self.device);
        let y = Tensor::<B, 2>::from_data(TensorData::new(target.to_vec(), [n, 1]), &self.device);
        let w = Tensor::<B, 2>::from_data(TensorData::new(weights.to_vec(), [n, 1]), &self.device);

        let mut model: Linear<B> = LinearConfig::new(dim + 1, 1)
            .with_bias(false)
            .with_initializer(Initializer::Zeros)
            .init(&self.device);
        let mut optimizer = AdamConfig::new().init();

        let mut best_loss = f64::INFINITY;
        let mut stale = 0usize;
        let mut final_loss = f64::NAN;
        let mut converged_at = None;

        for epoch in 0..config.max_epochs {
            let probs = sigmoid(model.forward(x.clone()));
            let penalty = model
                .weight
                .val()
                .slice([0..dim, 0..1])
                .powf_scalar(2.0)
                .sum()
                .mul_scalar(config.l2);

            let loss_value = objective(
                &values(probs.clone()),
                target,
                weights,
                weight_sum,
                &values(model.weight.val())[..dim],
                config.l2,
            );
            if !loss_value.is_finite() {
                return Err(FitError::NonFinite { epoch });
            }
            final_loss = loss_value;

            if loss_value < best_loss - config.tolerance {
                best_loss = loss_value;
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.patience {
                    converged_at = Some(epoch + 1);
                    break;
                }
            }

            let loss = weighted_bce(probs, y.clone(), w.clone(), weight_sum) + penalty;
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);
        }

        let epochs = converged_at.ok_or(FitError::NotConverged {
            epochs: config.max_epochs,
            loss: final_loss,
        })?;

        let mut params = values(model.weight.val());
        if params.len() != dim + 1 || params.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite { epoch: epochs });
        }
        let bias = params.pop().unwrap_or(0.0);

        log::debug!(
            "Logistic fit (l2={}) converged after {} epochs, loss {:.5}",
            config.l2,
            epochs,
            final_loss
        );

        Ok(LogisticModel {
            standardizer,
            weights: params,
            bias,
            epochs,
            final_loss,
        })
    }
}

fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// Penalized weighted log loss, summed in row order
fn objective(
    probs: &[f64],
    target: &[f64],
    weights: &[f64],
    weight_sum: f64,
    coefficients: &[f64],
    l2: f64,
) -> f64 {
    let eps = 1e-7;
    let bce: f64 = probs
        .iter()
        .zip(target)
        .zip(weights)
        .map(|((p, y), w)| {
            let p = p.clamp(eps, 1.0 - eps);
            -w * (y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    bce / weight_sum + l2 * coefficients.iter().map(|c| c * c).sum::<f64>()
}

/// Weighted mean binary cross-entropy
fn weighted_bce<B: AutodiffBackend>(
    probs: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    weights: Tensor<B, 2>,
    weight_sum: f64,
) -> Tensor<B, 1> {
    let eps = 1e-7;
    let probs_clamped = probs.clamp(eps, 1.0 - eps);
    let loss = targets.clone().neg() * probs_clamped.clone().log()
        - (targets.neg() + 1.0) * (probs_clamped.neg() + 1.0).log();
    (loss * weights).sum().div_scalar(weight_sum)
}
