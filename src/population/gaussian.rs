use ndarray::{Array1, Array2, ArrayView2};
use rand::RngCore;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::labels::{per_dimension_defaults, Labels};
use super::{has_non_positive, theta_row, LocationScale, Sensitivities};
use crate::error::PopulationError;
use crate::likelihood::distributions::{log_std_normal_pdf, lognormpdf};

/// Normally distributed individual parameters, ψ ~ N(μ, σ²).
///
/// Parameters are `[μ_1..μ_D, σ_1..σ_D]`. In the non-centered form the model
/// is defined over standard normal latent values η with ψ = μ + σ η.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GaussianModel {
    labels: Labels,
    centered: bool,
}

impl GaussianModel {
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
        per_dimension_defaults(&["Mean", "Std."], self.labels.n_dim())
    }

    pub(crate) fn mean_and_std(&self, theta: &[f64]) -> Result<(Array1<f64>, Array1<f64>), PopulationError> {
        let n_dim = self.labels.n_dim();
        let (mu, sigma) = theta.split_at(n_dim);
        if sigma.iter().any(|s| *s < 0.0) {
            return Err(INVALID_SCALE);
        }
        Ok((Array1::from(mu.to_vec()), Array1::from(sigma.to_vec())))
    }
}

const INVALID_SCALE: PopulationError = PopulationError::InvalidDistribution {
    distribution: "Gaussian",
    requirement: "a non-negative standard deviation",
};

impl LocationScale for GaussianModel {
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
                    if !(sigma > 0.0) {
                        return f64::NEG_INFINITY;
                    }
                    lognormpdf(row[dim], params[dim], sigma)
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
        if self.centered && has_non_positive(theta, n_dim..2 * n_dim) {
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
                    let residual = value - mu;
                    let var = sigma * sigma;
                    score += lognormpdf(value, mu, sigma);
                    dpsi[[i, dim]] = -residual / var + outer;
                    dtheta[[i, dim]] = residual / var;
                    dtheta[[i, n_dim + dim]] = -1.0 / sigma + residual * residual / (var * sigma);
                } else {
                    // ψ = μ + σ η
                    score += log_std_normal_pdf(value);
                    dpsi[[i, dim]] = -value + sigma * outer;
                    dtheta[[i, dim]] = outer;
                    dtheta[[i, n_dim + dim]] = value * outer;
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
                row[dim] = params[dim] + params[n_dim + dim] * row[dim];
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
                let normal =
                    Normal::new(params[dim], params[n_dim + dim]).map_err(|_| INVALID_SCALE)?;
                samples[[i, dim]] = normal.sample(rng);
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
        let model = GaussianModel::new(1, true).unwrap();
        let psi = array![[0.5], [1.5], [-0.2]];
        let (mu, sigma): (f64, f64) = (0.3, 1.7);
        let expected: f64 = psi
            .iter()
            .map(|x| {
                -0.5 * (2.0 * std::f64::consts::PI * sigma * sigma).ln()
                    - (x - mu).powi(2) / (2.0 * sigma * sigma)
            })
            .sum();
        let score = model.pointwise_rows(row(&[mu, sigma]), psi.view()).sum();
        assert_relative_eq!(score, expected, epsilon = 1e-12);
    }

    #[test]
    fn centered_rejects_non_positive_scale() {
        let model = GaussianModel::new(1, true).unwrap();
        let psi = array![[0.5]];
        let score = model.pointwise_rows(row(&[0.0, 0.0]), psi.view()).sum();
        assert_eq!(score, f64::NEG_INFINITY);
        let sens = model.sensitivities_rows(row(&[0.0, -1.0]), psi.view(), None);
        assert_eq!(sens.score, f64::NEG_INFINITY);
    }

    #[test]
    fn non_centered_score_is_independent_of_population_parameters() {
        let model = GaussianModel::new(1, false).unwrap();
        let eta = array![[0.1], [-1.2], [2.0]];
        let reference = model.pointwise_rows(row(&[0.0, 1.0]), eta.view()).sum();
        for theta in [[5.0, 0.1], [-3.0, 10.0], [1.0, 0.0], [1.0, -2.0]] {
            let score = model.pointwise_rows(row(&theta), eta.view()).sum();
            assert_eq!(score, reference);
            assert!(score.is_finite());
        }
    }

    #[test]
    fn non_centered_individual_parameters_are_affine() {
        let model = GaussianModel::new(1, false).unwrap();
        let eta = array![[0.0], [0.5], [-1.0]];
        let psi = model.individual_parameters_rows(row(&[0.3, 2.0]), eta.view());
        assert_eq!(psi, array![[0.3], [1.3], [-1.7]]);
    }

    #[test]
    fn sampling_rejects_negative_scale() {
        let model = GaussianModel::new(1, true).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(model.sample_rows(row(&[0.0, -1.0]), 3, &mut rng).is_err());
        let samples = model.sample_rows(row(&[2.0, 0.0]), 3, &mut rng).unwrap();
        assert_eq!(samples, array![[2.0], [2.0], [2.0]]);
    }
}
