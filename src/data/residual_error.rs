//! Residual error models.
//!
//! A residual error model turns the output of a mechanistic model into the
//! log-likelihood of the measurements. The standard deviation is computed
//! from the **prediction** and the error parameters are estimated alongside
//! the structural parameters, so they are passed in with every evaluation.
//!
//! # Error Model Types
//!
//! - **Constant**: σ = a (independent of prediction)
//! - **Proportional**: σ = b * |f| (scales with prediction)
//! - **Combined**: σ = sqrt(a² + b²*f²)

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::PopulationError;
use crate::likelihood::distributions::lognormpdf;

/// Capability consumed by [`crate::likelihood::LogLikelihood`].
pub trait ErrorModel {
    fn n_parameters(&self) -> usize;

    fn parameter_names(&self) -> Vec<String>;

    /// Log-likelihood of `observations` given the model outputs.
    ///
    /// Returns `-inf` for parameters outside the support.
    fn compute_log_likelihood(
        &self,
        parameters: &[f64],
        model_output: ArrayView1<f64>,
        observations: ArrayView1<f64>,
    ) -> f64;

    /// Log-likelihood and its gradient.
    ///
    /// `model_output_sens` has shape `(n_observations, n_structural)`. The
    /// gradient holds the `n_structural` derivatives with respect to the
    /// mechanistic parameters followed by those with respect to the error
    /// parameters.
    fn compute_sensitivities(
        &self,
        parameters: &[f64],
        model_output: ArrayView1<f64>,
        model_output_sens: ArrayView2<f64>,
        observations: ArrayView1<f64>,
    ) -> (f64, Array1<f64>);
}

/// Gaussian residual error model.
///
/// # Examples
///
/// ```rust
/// use popmix::data::ResidualErrorModel;
///
/// // Combined error: σ = sqrt(0.5² + 0.1² * f²)
/// let combined = ResidualErrorModel::Combined;
/// let sigma = combined.sigma(&[0.5, 0.1], 100.0).unwrap();
/// assert!((sigma - 100.25f64.sqrt()).abs() < 1e-10);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResidualErrorModel {
    /// σ = a
    ///
    /// Error is independent of the predicted value.
    #[default]
    Constant,

    /// σ = b * |f|
    ///
    /// Error scales linearly with the prediction.
    Proportional,

    /// σ = sqrt(a² + b² * f²)
    ///
    /// Dominated by `a` at low concentrations and by `b` at high ones.
    Combined,
}

impl ResidualErrorModel {
    /// Standard deviation at `prediction`.
    pub fn sigma(&self, parameters: &[f64], prediction: f64) -> Result<f64, PopulationError> {
        if parameters.len() != self.n_parameters() {
            return Err(PopulationError::ParameterCount {
                expected: self.n_parameters(),
                found: parameters.len(),
            });
        }
        Ok(self.sigma_with_derivatives(parameters, prediction).0)
    }

    /// Variance at `prediction`.
    pub fn variance(&self, parameters: &[f64], prediction: f64) -> Result<f64, PopulationError> {
        Ok(self.sigma(parameters, prediction)?.powi(2))
    }

    /// σ, dσ/df and dσ/d(parameters).
    fn sigma_with_derivatives(&self, parameters: &[f64], f: f64) -> (f64, f64, [f64; 2]) {
        match self {
            ResidualErrorModel::Constant => (parameters[0], 0.0, [1.0, 0.0]),
            ResidualErrorModel::Proportional => {
                let b = parameters[0];
                (b * f.abs(), b * f.signum(), [f.abs(), 0.0])
            }
            ResidualErrorModel::Combined => {
                let (a, b) = (parameters[0], parameters[1]);
                let sigma = (a.powi(2) + b.powi(2) * f.powi(2)).sqrt();
                (sigma, b * b * f / sigma, [a / sigma, b * f * f / sigma])
            }
        }
    }

    fn invalid(&self, parameters: &[f64]) -> bool {
        parameters.len() != self.n_parameters() || parameters.iter().any(|p| !(*p > 0.0))
    }
}

impl ErrorModel for ResidualErrorModel {
    fn n_parameters(&self) -> usize {
        match self {
            ResidualErrorModel::Constant | ResidualErrorModel::Proportional => 1,
            ResidualErrorModel::Combined => 2,
        }
    }

    fn parameter_names(&self) -> Vec<String> {
        let names: &[&str] = match self {
            ResidualErrorModel::Constant => &["Sigma base"],
            ResidualErrorModel::Proportional => &["Sigma rel."],
            ResidualErrorModel::Combined => &["Sigma base", "Sigma rel."],
        };
        names.iter().map(|name| name.to_string()).collect()
    }

    fn compute_log_likelihood(
        &self,
        parameters: &[f64],
        model_output: ArrayView1<f64>,
        observations: ArrayView1<f64>,
    ) -> f64 {
        if self.invalid(parameters) {
            return f64::NEG_INFINITY;
        }
        let mut score = 0.0;
        for (&f, &y) in model_output.iter().zip(observations.iter()) {
            let (sigma, _, _) = self.sigma_with_derivatives(parameters, f);
            if !(sigma > 0.0) {
                return f64::NEG_INFINITY;
            }
            score += lognormpdf(y, f, sigma);
        }
        score
    }

    fn compute_sensitivities(
        &self,
        parameters: &[f64],
        model_output: ArrayView1<f64>,
        model_output_sens: ArrayView2<f64>,
        observations: ArrayView1<f64>,
    ) -> (f64, Array1<f64>) {
        let n_structural = model_output_sens.ncols();
        let n_error = self.n_parameters();
        let mut gradient = Array1::zeros(n_structural + n_error);
        if self.invalid(parameters) {
            return (f64::NEG_INFINITY, gradient);
        }

        let mut score = 0.0;
        for (j, (&f, &y)) in model_output.iter().zip(observations.iter()).enumerate() {
            let (sigma, dsigma_df, dsigma_dparams) = self.sigma_with_derivatives(parameters, f);
            if !(sigma > 0.0) {
                return (f64::NEG_INFINITY, Array1::zeros(n_structural + n_error));
            }
            let residual = y - f;
            let var = sigma * sigma;
            score += lognormpdf(y, f, sigma);

            let dsigma = -1.0 / sigma + residual * residual / (var * sigma);
            let df = residual / var + dsigma * dsigma_df;
            for p in 0..n_structural {
                gradient[p] += df * model_output_sens[[j, p]];
            }
            for e in 0..n_error {
                gradient[n_structural + e] += dsigma * dsigma_dparams[e];
            }
        }
        (score, gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    #[test]
    fn sigma_values() {
        assert_relative_eq!(ResidualErrorModel::Constant.sigma(&[0.5], 100.0).unwrap(), 0.5);
        assert_relative_eq!(
            ResidualErrorModel::Proportional.sigma(&[0.1], -100.0).unwrap(),
            10.0
        );
        assert_relative_eq!(
            ResidualErrorModel::Combined.variance(&[0.5, 0.1], 100.0).unwrap(),
            100.25,
            epsilon = 1e-10
        );
    }

    #[test]
    fn sigma_checks_the_parameter_count() {
        assert!(matches!(
            ResidualErrorModel::Combined.sigma(&[0.5], 1.0),
            Err(PopulationError::ParameterCount { expected: 2, found: 1 })
        ));
        assert!(matches!(
            ResidualErrorModel::Constant.variance(&[], 1.0),
            Err(PopulationError::ParameterCount { expected: 1, found: 0 })
        ));
        assert!(ResidualErrorModel::Proportional.sigma(&[0.1, 0.2], 1.0).is_err());
    }

    #[test]
    fn non_positive_parameters_give_neg_infinity() {
        let output = array![1.0, 2.0];
        let observations = array![1.1, 1.9];
        for parameters in [vec![0.0, 0.1], vec![0.1, -1.0]] {
            let score = ResidualErrorModel::Combined.compute_log_likelihood(
                &parameters,
                output.view(),
                observations.view(),
            );
            assert_eq!(score, f64::NEG_INFINITY);
        }
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let model = ResidualErrorModel::Combined;
        let output = array![1.0, 2.0, 0.5];
        let observations = array![1.2, 1.7, 0.4];
        // Structural sensitivity d f_j / d p = j + 1 for one structural parameter
        let sens = Array2::from_shape_fn((3, 1), |(j, _)| (j + 1) as f64);
        let parameters = [0.3, 0.2];
        let (score, gradient) =
            model.compute_sensitivities(&parameters, output.view(), sens.view(), observations.view());
        assert_relative_eq!(
            score,
            model.compute_log_likelihood(&parameters, output.view(), observations.view()),
            epsilon = 1e-12
        );

        let epsilon = 1e-6;
        let shifted = |delta: f64| {
            let f = &output + &(sens.column(0).to_owned() * delta);
            model.compute_log_likelihood(&parameters, f.view(), observations.view())
        };
        let reference = (shifted(epsilon) - shifted(-epsilon)) / (2.0 * epsilon);
        assert_relative_eq!(gradient[0], reference, epsilon = 1e-5);

        for e in 0..2 {
            let mut up = parameters;
            let mut down = parameters;
            up[e] += epsilon;
            down[e] -= epsilon;
            let reference = (model.compute_log_likelihood(&up, output.view(), observations.view())
                - model.compute_log_likelihood(&down, output.view(), observations.view()))
                / (2.0 * epsilon);
            assert_relative_eq!(gradient[1 + e], reference, epsilon = 1e-5);
        }
    }
}
