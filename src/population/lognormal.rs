use ndarray::{Array1, Array2, ArrayView2};
use rand::RngCore;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};

use super::labels::{per_dimension_defaults, Labels};
use super::{has_non_positive, theta_row, LocationScale, Sensitivities};
use crate::error::PopulationError;
use crate::likelihood::distributions::{log_std_normal_pdf, lognormpdf};

/// Log-normally distributed individual parameters, log ψ ~ N(μ, σ²).
///
/// In the non-centered form ψ = exp(μ + σ η) with standard normal η.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogNormalModel {
    labels: Labels,
    centered: bool,
}

const INVALID_SCALE: PopulationError = PopulationError::InvalidDistribution {
    distribution: "log-normal",
    requirement: "a non-negative log standard deviation",
};

impl LogNormalModel {
    pub fn new(n_dim: usize, centered: bool) -> Result<Self, PopulationError> {
        Ok(Self {
            labels: Labels::new(n_dim)?,
            centered,
        })
    }

    pub fn is_centered(&self) -> bool {
        self.centered
    }

    pub(crate) fn labels(&self) -> &Labels {
        &self.labels
    }

    pub(crate) fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }

    pub(crate) fn default_names(&self) -> Vec<(String, usize)> {
        per_dimension_defaults(&["Log mean", "Log std."], self.labels.n_dim())
    }

    /// Mean and standard deviation of ψ, not of log ψ.
    pub(crate) fn mean_and_std(&self, theta: &[f64]) -> Result<(Array1<f64>, Array1<f64>), PopulationError> {
        let n_dim = self.labels.n_dim();
        let (mu, sigma) = theta.split_at(n_dim);
        if sigma.iter().any(|s| *s < 0.0) {
            return Err(INVALID_SCALE);
        }
        let mean = mu
            .iter()
            .zip(sigma)
            .map(|(m, s)| (m + s * s / 2.0).exp())
            .collect();
        let std = mu
            .iter()
            .zip(sigma)
            .map(|(m, s)| (((s * s).exp() - 1.0) * (2.0 * m + s * s).exp()).sqrt())
            .collect();
        Ok((mean, std))
    }
}

impl LocationScale for LogNormalModel {
    fn pointwise_rows(&self, theta: ArrayView2<f64>, psi: ArrayView2<f64>) -> Array1<f64> {
        let n_dim = self.labels.n_dim();
        let mut scores = Array1::zeros(psi.nrows());
        for (i, row) in psi.outer_iter().enumerate() {
            let params = theta_row(theta, i);
            scores[i] = (0..n_dim)
                .map(|dim| {
                    if !self.centered {
                        return log_std_normal_pdf(row[dim]);
                    }
                    let sigma = params[n_dim + dim];
                    let value = row[dim];
                    if !(sigma > 0.0) || value <= 0.0 {
                        return f64::NEG_INFINITY;
                    }
                    lognormpdf(value.ln(), params[dim], sigma) - value.ln()
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
        if self.centered
            && (has_non_positive(theta, n_dim..2 * n_dim) || psi.iter().any(|v| *v <= 0.0))
        {
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
                if self.centered {
                    let log_value = value.ln();
                    let residual = log_value - mu;
                    let var = sigma * sigma;
                    score += lognormpdf(log_value, mu, sigma) - log_value;
                    dpsi[[i, dim]] = -1.0 / value - residual / (var * value) + outer;
                    dtheta[[i, dim]] = residual / var;
                    dtheta[[i, n_dim + dim]] = -1.0 / sigma + residual * residual / (var * sigma);
                } else {
                    // ψ = exp(μ + σ η)
                    let individual = (mu + sigma * value).exp();
                    score += log_std_normal_pdf(value);
                    dpsi[[i, dim]] = -value + sigma * individual * outer;
                    dtheta[[i, dim]] = individual * outer;
                    dtheta[[i, n_dim + dim]] = individual * value * outer;
                }
            }
        }
        Sensitivities { score, dpsi, dtheta }
    }

    fn individual_parameters_rows(&self, theta: ArrayView2<f64>, eta: ArrayView2<f64>) -> Array2<f64> {
        if self.centered {
            return eta.to_owned();
        }
        let n_dim = self.labels.n_dim();
        let mut psi = eta.to_owned();
        for (i, mut row) in psi.outer_iter_mut().enumerate() {
            let params = theta_row(theta, i);
            for dim in 0..n_dim {
                row[dim] = (params[dim] + params[n_dim + dim] * row[dim]).exp();
            }
        }
        psi
    }

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
                let lognormal =
                    LogNormal::new(params[dim], params[n_dim + dim]).map_err(|_| INVALID_SCALE)?;
                samples[[i, dim]] = lognormal.sample(rng);
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, aview1, Axis};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn row(theta: &[f64]) -> ArrayView2<'_, f64> {
        aview1(theta).insert_axis(Axis(0))
    }

    #[test]
    fn centered_log_likelihood_matches_closed_form() {
        let model = LogNormalModel::new(1, true).unwrap();
        let psi = array![[0.5], [2.0]];
        let (mu, sigma) = (0.2f64, 0.8f64);
        let expected: f64 = psi
            .iter()
            .map(|x: &f64| {
                -0.5 * (2.0 * std::f64::consts::PI).ln()
                    - sigma.ln()
                    - x.ln()
                    - (x.ln() - mu).powi(2) / (2.0 * sigma * sigma)
            })
            .sum();
        let score = model.pointwise_rows(row(&[mu, sigma]), psi.view()).sum();
        assert_relative_eq!(score, expected, epsilon = 1e-12);
    }

    #[test]
    fn centered_rejects_values_outside_support() {
        let model = LogNormalModel::new(1, true).unwrap();
        let psi = array![[1.0], [0.0]];
        assert_eq!(
            model.pointwise_rows(row(&[0.0, 1.0]), psi.view())[1],
            f64::NEG_INFINITY
        );
        let sens = model.sensitivities_rows(row(&[0.0, 1.0]), psi.view(), None);
        assert_eq!(sens.score, f64::NEG_INFINITY);
    }

    #[test]
    fn non_centered_individual_parameters() {
        let model = LogNormalModel::new(1, false).unwrap();
        let eta = array![[0.2], [-0.3]];
        let psi = model.individual_parameters_rows(row(&[0.3, 1e-10]), eta.view());
        assert_relative_eq!(psi[[0, 0]], 0.3f64.exp(), epsilon = 1e-8);
        assert_relative_eq!(psi[[1, 0]], 0.3f64.exp(), epsilon = 1e-8);
    }

    #[test]
    fn moments_of_exponentiated_normal() {
        let model = LogNormalModel::new(1, true).unwrap();
        let (mean, std) = model.mean_and_std(&[0.0, 1.0]).unwrap();
        assert_relative_eq!(mean[0], 0.5f64.exp(), epsilon = 1e-12);
        let expected = ((1f64.exp() - 1.0) * 1f64.exp()).sqrt();
        assert_relative_eq!(std[0], expected, epsilon = 1e-12);
        assert!(model.mean_and_std(&[0.0, -1.0]).is_err());
    }

    #[test]
    fn samples_are_positive() {
        let model = LogNormalModel::new(2, false).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let samples = model
            .sample_rows(row(&[0.0, 1.0, 0.5, 0.2]), 50, &mut rng)
            .unwrap();
        assert_eq!(samples.dim(), (50, 2));
        assert!(samples.iter().all(|v| *v > 0.0));
    }
}
