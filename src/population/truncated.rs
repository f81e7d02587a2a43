use ndarray::{Array1, Array2, ArrayView2};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::labels::{per_dimension_defaults, Labels};
use super::{has_non_positive, theta_row, LocationScale, Sensitivities};
use crate::error::PopulationError;
use crate::likelihood::distributions::{
    inverse_mills_ratio, log_std_normal_cdf, lognormpdf, std_normal_cdf, std_normal_quantile,
};

/// Gaussian individual parameters truncated to ψ ≥ 0.
///
/// The density is normalised by `1 - Φ(-μ/σ) = Φ(μ/σ)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TruncatedGaussianModel {
    labels: Labels,
}

const INVALID_SCALE: PopulationError = PopulationError::InvalidDistribution {
    distribution: "truncated Gaussian",
    requirement: "a non-negative standard deviation",
};

impl TruncatedGaussianModel {
    pub fn new(n_dim: usize) -> Result<Self, PopulationError> {
        Ok(Self {
            labels: Labels::new(n_dim)?,
        })
    }

    pub(crate) fn labels(&self) -> &Labels {
        &self.labels
    }

    pub(crate) fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }

    pub(crate) fn default_names(&self) -> Vec<(String, usize)> {
        per_dimension_defaults(&["Mu", "Sigma"], self.labels.n_dim())
    }

    /// Moments of the truncated distribution.
    ///
    /// With α = -μ/σ and λ = φ(α) / (1 - Φ(α)):
    /// ```text
    /// mean = μ + σ λ
    /// var  = σ² (1 + α λ - λ²)
    /// ```
    pub(crate) fn mean_and_std(&self, theta: &[f64]) -> Result<(Array1<f64>, Array1<f64>), PopulationError> {
        let n_dim = self.labels.n_dim();
        let (mu, sigma) = theta.split_at(n_dim);
        if sigma.iter().any(|s| *s < 0.0) {
            return Err(INVALID_SCALE);
        }
        let mut mean = Array1::zeros(n_dim);
        let mut std = Array1::zeros(n_dim);
        for dim in 0..n_dim {
            let (m, s) = (mu[dim], sigma[dim]);
            if s == 0.0 {
                mean[dim] = m.max(0.0);
                continue;
            }
            let alpha = -m / s;
            let lambda = inverse_mills_ratio(m / s);
            mean[dim] = m + s * lambda;
            std[dim] = (s * s * (1.0 + alpha * lambda - lambda * lambda)).max(0.0).sqrt();
        }
        Ok((mean, std))
    }
}

impl LocationScale for TruncatedGaussianModel {
    fn pointwise_rows(&self, theta: ArrayView2<f64>, psi: ArrayView2<f64>) -> Array1<f64> {
        let n_dim = self.labels.n_dim();
        let mut scores = Array1::zeros(psi.nrows());
        for (i, row) in psi.outer_iter().enumerate() {
            let params = theta_row(theta, i);
            scores[i] = (0..n_dim)
                .map(|dim| {
                    let (mu, sigma) = (params[dim], params[n_dim + dim]);
                    if !(sigma > 0.0) || row[dim] < 0.0 {
                        return f64::NEG_INFINITY;
                    }
                    lognormpdf(row[dim], mu, sigma) - log_std_normal_cdf(mu / sigma)
                })
                .sum();
        }
        scores
    }

    fn sensitivities_rows(
        &self,
        theta: ArrayView2<f64>,
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
    ) -> Sensitivities {
        let (n_ids, n_dim) = psi.dim();
        if has_non_positive(theta, n_dim..2 * n_dim) || psi.iter().any(|v| *v < 0.0) {
            return Sensitivities::rejected(n_ids, n_dim, n_ids, 2 * n_dim);
        }

        let mut score = 0.0;
        let mut dpsi = Array2::zeros((n_ids, n_dim));
        let mut dtheta = Array2::zeros((n_ids, 2 * n_dim));
        for i in 0..n_ids {
            let params = theta_row(theta, i);
            for dim in 0..n_dim {
                let (mu, sigma) = (params[dim], params[n_dim + dim]);
                let value = psi[[i, dim]];
                let outer = dlogp_dpsi.map_or(0.0, |dlogp| dlogp[[i, dim]]);
                let residual = value - mu;
                let var = sigma * sigma;
                // Derivative of -ln Φ(μ/σ) enters through the ratio φ/Φ
                let ratio = inverse_mills_ratio(mu / sigma);
                score += lognormpdf(value, mu, sigma) - log_std_normal_cdf(mu / sigma);
                dpsi[[i, dim]] = -residual / var + outer;
                dtheta[[i, dim]] = residual / var - ratio / sigma;
                dtheta[[i, n_dim + dim]] =
                    -1.0 / sigma + residual * residual / (var * sigma) + ratio * mu / var;
            }
        }
        Sensitivities { score, dpsi, dtheta }
    }

    fn individual_parameters_rows(&self, _theta: ArrayView2<f64>, eta: ArrayView2<f64>) -> Array2<f64> {
        eta.to_owned()
    }

    /// Inverse transform sampling restricted to the upper tail.
    fn sample_rows(
        &self,
        theta: ArrayView2<f64>,
        n_samples: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f64>, PopulationError> {
        let n_dim = self.labels.n_dim();
        if theta
            .outer_iter()
            .any(|row| row.iter().skip(n_dim).any(|s| *s < 0.0))
        {
            return Err(INVALID_SCALE);
        }
        let mut samples = Array2::zeros((n_samples, n_dim));
        for i in 0..n_samples {
            let params = theta_row(theta, i);
            for dim in 0..n_dim {
                let (mu, sigma) = (params[dim], params[n_dim + dim]);
                let uniform: f64 = rng.random();
                if sigma == 0.0 {
                    samples[[i, dim]] = mu.max(0.0);
                    continue;
                }
                // Inverted from the upper tail, P(ψ > x) = (1 - u) Φ(μ/σ)
                let tail = ((1.0 - uniform) * std_normal_cdf(mu / sigma))
                    .clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
                // max only absorbs rounding at the truncation point
                samples[[i, dim]] = (mu - sigma * std_normal_quantile(tail)).max(0.0);
            }
        }
        Ok(samples)
    }
}
