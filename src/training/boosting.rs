//! Gradient-boosted regression trees on the logistic loss
//!
//! Each round fits a depth-limited tree to the gradient/hessian of the
//! weighted log loss using histogram splits over per-feature quantile
//! thresholds; leaves take Newton steps shrunk by the learning rate.

use serde::{Deserialize, Serialize};

use super::model::FitError;

#[derive(Debug, Clone)]
pub struct BoostingConfig {
    pub rounds: usize,
    pub depth: usize,
    pub learning_rate: f64,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
    /// L2 penalty on leaf values
    pub l2: f64,
    /// Maximum candidate thresholds per feature
    pub bins: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single regression tree stored as a node arena, root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

/// Fitted tree ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    /// Log-odds of the weighted training home-win rate
    pub base_score: f64,
    pub trees: Vec<Tree>,
    /// Split gain per feature, normalized to sum to 1
    pub importance: Vec<f64>,
}

impl BoostedModel {
    pub fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.raw_score(row))
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Candidate thresholds and the bin of every row, per feature
struct Binned {
    thresholds: Vec<Vec<f64>>,
    /// `bins[f][i]` = number of thresholds strictly below row i's value
    bins: Vec<Vec<u16>>,
}

impl Binned {
    fn new(rows: &[Vec<f64>], max_bins: usize) -> Self {
        let dim = rows.first().map_or(0, |r| r.len());
        let mut thresholds = Vec::with_capacity(dim);
        let mut bins = Vec::with_capacity(dim);

        for f in 0..dim {
            let mut values: Vec<f64> = rows.iter().map(|r| r[f]).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            values.dedup();

            let cuts = quantile_thresholds(&values, max_bins);
            let assigned = rows
                .iter()
                .map(|r| cuts.partition_point(|t| *t < r[f]) as u16)
                .collect();
            thresholds.push(cuts);
            bins.push(assigned);
        }

        Binned { thresholds, bins }
    }
}

/// Midpoints between distinct values, thinned to at most `max_bins - 1` cuts
fn quantile_thresholds(distinct: &[f64], max_bins: usize) -> Vec<f64> {
    if distinct.len() < 2 {
        return Vec::new();
    }
    let max_bins = max_bins.clamp(2, u16::MAX as usize);
    let mut cuts: Vec<f64> = if distinct.len() <= max_bins {
        distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
    } else {
        (1..max_bins)
            .map(|j| {
                let idx = (j * distinct.len() / max_bins).max(1);
                (distinct[idx - 1] + distinct[idx]) / 2.0
            })
            .collect()
    };
    cuts.dedup();
    cuts
}

struct SplitChoice {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct TreeBuilder<'a> {
    binned: &'a Binned,
    grad: &'a [f64],
    hess: &'a [f64],
    config: &'a BoostingConfig,
    nodes: Vec<Node>,
    importance: &'a mut [f64],
}

impl TreeBuilder<'_> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.config.l2) * self.config.learning_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.config.l2)
    }

    fn build(&mut self, rows: &[usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });

        if depth >= self.config.depth || rows.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(rows, g, h) else {
            return idx;
        };

        let bins = &self.binned.bins[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&i| (bins[i] as usize) <= split.bin);

        self.importance[split.feature] += split.gain;
        let left = self.build(&left_rows, depth + 1);
        let right = self.build(&right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: self.binned.thresholds[split.feature][split.bin],
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitChoice> {
        let parent = self.score(g, h);
        let mut best: Option<SplitChoice> = None;

        for (feature, cuts) in self.binned.thresholds.iter().enumerate() {
            if cuts.is_empty() {
                continue;
            }
            let bins = &self.binned.bins[feature];
            let mut hist_g = vec![0.0; cuts.len() + 1];
            let mut hist_h = vec![0.0; cuts.len() + 1];
            for &i in rows {
                hist_g[bins[i] as usize] += self.grad[i];
                hist_h[bins[i] as usize] += self.hess[i];
            }

            let (mut gl, mut hl) = (0.0, 0.0);
            for bin in 0..cuts.len() {
                gl += hist_g[bin];
                hl += hist_h[bin];
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.config.min_child_weight || hr < self.config.min_child_weight {
                    continue;
                }
                let gain = self.score(gl, hl) + self.score(gr, hr) - parent;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitChoice { feature, bin, gain });
                }
            }
        }
        best
    }
}

/// Fit a boosted ensemble on weighted rows
pub fn fit_boosted(
    rows: &[Vec<f64>],
    target: &[f64],
    weights: &[f64],
    config: &BoostingConfig,
) -> Result<BoostedModel, FitError> {
    let n = rows.len();
    if n == 0 || target.len() != n || weights.len() != n {
        return Err(FitError::EmptyTrainingSet);
    }
    let dim = rows[0].len();

    let weight_sum: f64 = weights.iter().sum();
    let positive: f64 = target.iter().zip(weights).map(|(y, w)| y * w).sum();
    let rate = (positive / weight_sum).clamp(1e-6, 1.0 - 1e-6);
    let base_score = (rate / (1.0 - rate)).ln();

    let binned = Binned::new(rows, config.bins);
    let all_rows: Vec<usize> = (0..n).collect();
    let mut scores = vec![base_score; n];
    let mut importance = vec![0.0; dim];
    let mut trees = Vec::with_capacity(config.rounds);
    let mut grad = vec![0.0; n];
    let mut hess = vec![0.0; n];

    for round in 0..config.rounds {
        for i in 0..n {
            let p = sigmoid(scores[i]);
            grad[i] = weights[i] * (p - target[i]);
            hess[i] = weights[i] * p * (1.0 - p);
        }

        let mut builder = TreeBuilder {
            binned: &binned,
            grad: &grad,
            hess: &hess,
            config,
            nodes: Vec::new(),
            importance: &mut importance,
        };
        builder.build(&all_rows, 0);
        let tree = Tree {
            nodes: builder.nodes,
        };

        for (score, row) in scores.iter_mut().zip(rows) {
            *score += tree.predict(row);
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(FitError::NonFinite { epoch: round });
        }
        trees.push(tree);
    }

    let total: f64 = importance.iter().sum();
    if total > 0.0 {
        for v in importance.iter_mut() {
            *v /= total;
        }
    }

    log::debug!(
        "Boosted fit: {} trees of depth {} over {} features",
        trees.len(),
        config.depth,
        dim
    );
    Ok(BoostedModel {
        base_score,
        trees,
        importance,
    })
}
