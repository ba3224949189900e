//! Diagonal-covariance Gaussian mixture fitted with expectation maximisation.
//!
//! Each initialisation seeds k-means with k-means++, runs Lloyd iterations,
//! turns the hard labels into responsibilities and then alternates E and M
//! steps until the mean log-likelihood stops moving. Initialisations run in
//! parallel and the one with the best final lower bound wins.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::MatchError;

const KMEANS_MAX_ITER: usize = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmmConfig {
    #[serde(default = "default_n_components")]
    pub n_components: usize,
    /// Independent initialisations; the best lower bound is kept
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Convergence threshold on the change in mean log-likelihood
    #[serde(default = "default_tol")]
    pub tol: f64,
    /// Added to every variance
    #[serde(default = "default_reg_covar")]
    pub reg_covar: f64,
    /// Base seed; initialisation `i` uses `seed + i`
    #[serde(default)]
    pub seed: u64,
}

fn default_n_components() -> usize {
    16
}

fn default_n_init() -> usize {
    3
}

fn default_max_iter() -> usize {
    100
}

fn default_tol() -> f64 {
    1e-3
}

fn default_reg_covar() -> f64 {
    1e-6
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            n_components: default_n_components(),
            n_init: default_n_init(),
            max_iter: default_max_iter(),
            tol: default_tol(),
            reg_covar: default_reg_covar(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GaussianMixture {
    weights: Array1<f64>,
    means: Array2<f64>,
    variances: Array2<f64>,
}

fn log_sum_exp(values: ArrayView1<f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// k-means++ seeding followed by Lloyd iterations. Returns one label per row.
fn kmeans_labels(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = data.nrows();
    let mut centers = Array2::<f64>::zeros((k, data.ncols()));

    let first = rng.gen_range(0..n);
    centers.row_mut(0).assign(&data.row(first));
    let mut closest: Vec<f64> = data
        .outer_iter()
        .map(|row| squared_distance(row, centers.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = n - 1;
            for (i, d) in closest.iter().enumerate() {
                if target < *d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        } else {
            rng.gen_range(0..n)
        };
        centers.row_mut(c).assign(&data.row(chosen));
        for (i, row) in data.outer_iter().enumerate() {
            closest[i] = closest[i].min(squared_distance(row, centers.row(c)));
        }
    }

    let mut labels = vec![usize::MAX; n];
    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (i, row) in data.outer_iter().enumerate() {
            let best = (0..k)
                .map(|c| (c, squared_distance(row, centers.row(c))))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(c, _)| c)
                .unwrap_or(0);
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = Array2::<f64>::zeros(centers.dim());
        let mut counts = vec![0usize; k];
        for (row, &label) in data.outer_iter().zip(labels.iter()) {
            let mut sum = sums.row_mut(label);
            sum += &row;
            counts[label] += 1;
        }
        for c in 0..k {
            // Empty clusters keep their previous centre.
            if counts[c] > 0 {
                centers.row_mut(c).assign(&(&sums.row(c) / counts[c] as f64));
            }
        }
    }
    labels
}

impl GaussianMixture {
    /// Fit a mixture to `data` (`[samples, features]`).
    pub fn fit(data: &Array2<f64>, config: &GmmConfig) -> Result<Self, MatchError> {
        let (samples, features) = data.dim();
        if config.n_components == 0 || config.n_init == 0 {
            return Err(MatchError::Computation(
                "mixture needs at least one component and one initialisation".to_string(),
            ));
        }
        if samples < config.n_components {
            return Err(MatchError::Computation(format!(
                "expected at least {} samples for {} components, got {}",
                config.n_components, config.n_components, samples
            )));
        }
        if features == 0 {
            return Err(MatchError::Computation("feature matrix has no columns".to_string()));
        }

        let runs: Vec<Result<(f64, GaussianMixture), MatchError>> = (0..config.n_init)
            .into_par_iter()
            .map(|init| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(init as u64));
                Self::fit_once(data, config, &mut rng)
            })
            .collect();

        let mut best: Option<(f64, GaussianMixture)> = None;
        let mut last_error = None;
        for run in runs {
            match run {
                Ok((bound, model)) => {
                    if best.as_ref().map_or(true, |(b, _)| bound > *b) {
                        best = Some((bound, model));
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        match (best, last_error) {
            (Some((bound, model)), _) => {
                tracing::debug!(lower_bound = bound, components = config.n_components, "Fitted mixture");
                Ok(model)
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(MatchError::Computation("no initialisation succeeded".to_string())),
        }
    }

    fn fit_once(data: &Array2<f64>, config: &GmmConfig, rng: &mut StdRng) -> Result<(f64, Self), MatchError> {
        let k = config.n_components;
        let labels = kmeans_labels(data, k, rng);
        let mut resp = Array2::<f64>::zeros((data.nrows(), k));
        for (i, &label) in labels.iter().enumerate() {
            resp[[i, label]] = 1.0;
        }

        let mut model = Self::from_responsibilities(data, &resp, config.reg_covar)?;
        let mut lower_bound = f64::NEG_INFINITY;
        let mut converged = false;

        for _ in 0..config.max_iter {
            let previous = lower_bound;
            let (mean_log_prob, log_resp) = model.expectation(data);
            model = Self::from_responsibilities(data, &log_resp.mapv(f64::exp), config.reg_covar)?;
            lower_bound = mean_log_prob;

            if (lower_bound - previous).abs() < config.tol {
                converged = true;
                break;
            }
        }

        if !converged {
            tracing::warn!(max_iter = config.max_iter, "Mixture initialisation did not converge");
        }
        Ok((lower_bound, model))
    }

    /// M step: weighted means and diagonal variances from responsibilities.
    fn from_responsibilities(data: &Array2<f64>, resp: &Array2<f64>, reg_covar: f64) -> Result<Self, MatchError> {
        let nk = resp.sum_axis(Axis(0)) + 10.0 * f64::EPSILON;
        let nk_col = nk.view().insert_axis(Axis(1));

        let means = resp.t().dot(data) / &nk_col;
        let avg_sq = resp.t().dot(&data.mapv(|v| v * v)) / &nk_col;
        let variances = avg_sq - means.mapv(|m| m * m) + reg_covar;

        if variances.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(MatchError::Computation(
                "mixture component has an ill-defined variance".to_string(),
            ));
        }

        let weights = &nk / nk.sum();
        Ok(Self {
            weights,
            means,
            variances,
        })
    }

    /// Per-sample, per-component `log(weight) + log N(x | mean, var)`.
    fn weighted_log_prob(&self, data: &Array2<f64>) -> Array2<f64> {
        let (samples, features) = data.dim();
        let k = self.weights.len();
        let log_norm = features as f64 * (2.0 * PI).ln();

        let constants: Vec<f64> = (0..k)
            .map(|c| {
                let log_det: f64 = self.variances.row(c).iter().map(|v| v.ln()).sum();
                self.weights[c].ln() - 0.5 * (log_norm + log_det)
            })
            .collect();

        Array2::from_shape_fn((samples, k), |(i, c)| {
            let mahalanobis: f64 = data
                .row(i)
                .iter()
                .zip(self.means.row(c).iter())
                .zip(self.variances.row(c).iter())
                .map(|((x, m), v)| (x - m).powi(2) / v)
                .sum();
            constants[c] - 0.5 * mahalanobis
        })
    }

    /// E step: mean log-likelihood and log responsibilities.
    fn expectation(&self, data: &Array2<f64>) -> (f64, Array2<f64>) {
        let mut log_resp = self.weighted_log_prob(data);
        let mut total = 0.0;
        for mut row in log_resp.outer_iter_mut() {
            let norm = log_sum_exp(row.view());
            row -= norm;
            total += norm;
        }
        (total / data.nrows().max(1) as f64, log_resp)
    }

    /// Per-sample log-likelihood
    pub fn score_samples(&self, data: &Array2<f64>) -> Array1<f64> {
        self.weighted_log_prob(data)
            .outer_iter()
            .map(log_sum_exp)
            .collect()
    }

    /// Mean log-likelihood over all rows
    pub fn score(&self, data: &Array2<f64>) -> Result<f64, MatchError> {
        if data.ncols() != self.means.ncols() {
            return Err(MatchError::Computation(format!(
                "model has {} features, sample has {}",
                self.means.ncols(),
                data.ncols()
            )));
        }
        if data.nrows() == 0 {
            return Err(MatchError::Computation("no frames to score".to_string()));
        }
        Ok(self.score_samples(data).mean().unwrap_or(f64::NEG_INFINITY))
    }

    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }
}
