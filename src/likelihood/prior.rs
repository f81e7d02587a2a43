use std::f64::consts::LN_2;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};

use super::distributions::lognormpdf;
use super::{check_length, LogPdf};
use crate::error::PopulationError;

/// One-dimensional prior distribution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Prior {
    Normal { mean: f64, std: f64 },
    LogNormal { log_mean: f64, log_std: f64 },
    Uniform { lower: f64, upper: f64 },
    HalfNormal { std: f64 },
}

impl Prior {
    fn validate(&self) -> Result<(), PopulationError> {
        let (distribution, valid, requirement) = match *self {
            Prior::Normal { std, .. } => ("normal", std > 0.0, "a positive standard deviation"),
            Prior::LogNormal { log_std, .. } => {
                ("log-normal", log_std > 0.0, "a positive standard deviation")
            }
            Prior::Uniform { lower, upper } => ("uniform", lower < upper, "lower < upper"),
            Prior::HalfNormal { std } => ("half-normal", std > 0.0, "a positive standard deviation"),
        };
        if valid {
            Ok(())
        } else {
            Err(PopulationError::InvalidDistribution {
                distribution,
                requirement,
            })
        }
    }

    pub fn logpdf(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mean, std } => lognormpdf(x, mean, std),
            Prior::LogNormal { log_mean, log_std } => {
                if x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                lognormpdf(x.ln(), log_mean, log_std) - x.ln()
            }
            Prior::Uniform { lower, upper } => {
                if x < lower || x > upper {
                    return f64::NEG_INFINITY;
                }
                -(upper - lower).ln()
            }
            Prior::HalfNormal { std } => {
                if x < 0.0 {
                    return f64::NEG_INFINITY;
                }
                LN_2 + lognormpdf(x, 0.0, std)
            }
        }
    }

    /// Derivative of [`Prior::logpdf`], zero outside the support.
    pub fn dlogpdf(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mean, std } => -(x - mean) / (std * std),
            Prior::LogNormal { log_mean, log_std } => {
                if x <= 0.0 {
                    return 0.0;
                }
                -1.0 / x - (x.ln() - log_mean) / (log_std * log_std * x)
            }
            Prior::Uniform { .. } => 0.0,
            Prior::HalfNormal { std } => {
                if x < 0.0 {
                    return 0.0;
                }
                -x / (std * std)
            }
        }
    }

    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<f64, PopulationError> {
        let invalid = |_| PopulationError::Prior(format!("cannot sample from {:?}", self));
        Ok(match *self {
            Prior::Normal { mean, std } => Normal::new(mean, std).map_err(invalid)?.sample(rng),
            Prior::LogNormal { log_mean, log_std } => LogNormal::new(log_mean, log_std)
                .map_err(invalid)?
                .sample(rng),
            Prior::Uniform { lower, upper } => rng.random_range(lower..upper),
            Prior::HalfNormal { std } => Normal::new(0.0, std).map_err(invalid)?.sample(rng).abs(),
        })
    }
}

/// Product of independent one-dimensional priors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogPrior {
    priors: Vec<Prior>,
    names: Vec<String>,
}

impl LogPrior {
    pub fn new(priors: Vec<Prior>) -> Result<Self, PopulationError> {
        if priors.is_empty() {
            return Err(PopulationError::Prior(
                "at least one prior is required".to_string(),
            ));
        }
        priors.iter().try_for_each(Prior::validate)?;
        let names = (1..=priors.len()).map(|k| format!("Parameter {}", k)).collect();
        Ok(Self { priors, names })
    }

    pub fn with_names(mut self, names: Vec<String>) -> Result<Self, PopulationError> {
        if names.len() != self.priors.len() {
            return Err(PopulationError::NameLength {
                expected: self.priors.len(),
                found: names.len(),
            });
        }
        self.names = names;
        Ok(self)
    }

    pub fn priors(&self) -> &[Prior] {
        &self.priors
    }

    /// Draws `n_samples` points, shape `(n_samples, n_parameters)`.
    pub fn sample(&self, n_samples: usize, rng: &mut dyn RngCore) -> Result<Array2<f64>, PopulationError> {
        let mut samples = Array2::zeros((n_samples, self.priors.len()));
        for mut row in samples.rows_mut() {
            for (value, prior) in row.iter_mut().zip(&self.priors) {
                *value = prior.sample(rng)?;
            }
        }
        Ok(samples)
    }

    /// Initial points for optimisation or sampling runs.
    pub fn sample_seeded(&self, n_samples: usize, seed: u64) -> Result<Array2<f64>, PopulationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.sample(n_samples, &mut rng)
    }
}

impl LogPdf for LogPrior {
    fn n_parameters(&self) -> usize {
        self.priors.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError> {
        check_length(self.priors.len(), parameters)?;
        Ok(self
            .priors
            .iter()
            .zip(parameters)
            .map(|(prior, &x)| prior.logpdf(x))
            .sum())
    }

    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError> {
        let score = self.evaluate(parameters)?;
        if score == f64::NEG_INFINITY {
            return Ok((score, vec![0.0; parameters.len()]));
        }
        let gradient = self
            .priors
            .iter()
            .zip(parameters)
            .map(|(prior, &x)| prior.dlogpdf(x))
            .collect();
        Ok((score, gradient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn log_prior() -> LogPrior {
        LogPrior::new(vec![
            Prior::Normal { mean: 1.0, std: 2.0 },
            Prior::LogNormal {
                log_mean: 0.5,
                log_std: 0.3,
            },
            Prior::Uniform {
                lower: -1.0,
                upper: 3.0,
            },
            Prior::HalfNormal { std: 0.5 },
        ])
        .unwrap()
    }

    #[test]
    fn densities_match_closed_forms() {
        assert_relative_eq!(
            Prior::Uniform { lower: 0.0, upper: 4.0 }.logpdf(1.0),
            -(4.0f64).ln()
        );
        assert_relative_eq!(
            Prior::HalfNormal { std: 1.0 }.logpdf(0.0),
            (2.0 / std::f64::consts::PI).sqrt().ln(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            Prior::LogNormal {
                log_mean: 0.0,
                log_std: 1.0
            }
            .logpdf(1.0),
            -0.5 * (2.0 * std::f64::consts::PI).ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn outside_support_is_neg_infinity() {
        let log_prior = log_prior();
        let (score, gradient) = log_prior.evaluate_s1(&[0.0, -1.0, 0.0, 0.1]).unwrap();
        assert_eq!(score, f64::NEG_INFINITY);
        assert_eq!(gradient, vec![0.0; 4]);
        assert_eq!(log_prior.evaluate(&[0.0, 1.0, 5.0, 0.1]).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let log_prior = log_prior();
        let parameters = [0.3, 1.7, 0.5, 0.4];
        let (_, gradient) = log_prior.evaluate_s1(&parameters).unwrap();
        let epsilon = 1e-5;
        for p in 0..parameters.len() {
            let mut up = parameters;
            let mut down = parameters;
            up[p] += epsilon;
            down[p] -= epsilon;
            let reference = (log_prior.evaluate(&up).unwrap() - log_prior.evaluate(&down).unwrap())
                / (2.0 * epsilon);
            assert_relative_eq!(gradient[p], reference, epsilon = 1e-6);
        }
    }

    #[test]
    fn samples_lie_in_the_support() {
        let log_prior = log_prior();
        let samples = log_prior.sample_seeded(50, 7).unwrap();
        assert_eq!(samples.dim(), (50, 4));
        for row in samples.rows() {
            assert!(log_prior.evaluate(&row.to_vec()).unwrap().is_finite());
        }
        assert_eq!(samples, log_prior.sample_seeded(50, 7).unwrap());
    }

    #[test]
    fn invalid_priors_are_rejected() {
        assert!(LogPrior::new(vec![Prior::Normal { mean: 0.0, std: 0.0 }]).is_err());
        assert!(LogPrior::new(vec![Prior::Uniform { lower: 1.0, upper: 1.0 }]).is_err());
        assert!(LogPrior::new(vec![]).is_err());
        assert!(log_prior().with_names(vec!["a".into()]).is_err());
    }
}
