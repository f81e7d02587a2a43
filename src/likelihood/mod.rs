//! Log-likelihoods, priors and posteriors.
//!
//! Everything an optimiser or sampler evaluates implements [`LogPdf`]: a
//! scalar function of a flat parameter vector with an optional gradient.
//! Out-of-support parameters give `-inf`; only malformed inputs are errors.

pub mod distributions;
pub mod hierarchical;
pub mod individual;
pub mod posterior;
pub mod prior;
pub mod reduced;

use crate::error::PopulationError;

pub use hierarchical::HierarchicalLogLikelihood;
pub use individual::LogLikelihood;
pub use posterior::{HierarchicalLogPosterior, LogPosterior};
pub use prior::{LogPrior, Prior};
pub use reduced::ReducedLogLikelihood;

pub trait LogPdf {
    fn n_parameters(&self) -> usize;

    fn parameter_names(&self) -> Vec<String>;

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError>;

    /// Score and gradient. A `-inf` score comes with a zero gradient.
    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError>;
}

/// Log-likelihood of the measurements of one individual.
pub trait IndividualLogLikelihood: LogPdf {
    fn id(&self) -> Option<&str> {
        None
    }
}

impl<T: LogPdf + ?Sized> LogPdf for Box<T> {
    fn n_parameters(&self) -> usize {
        (**self).n_parameters()
    }

    fn parameter_names(&self) -> Vec<String> {
        (**self).parameter_names()
    }

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError> {
        (**self).evaluate(parameters)
    }

    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError> {
        (**self).evaluate_s1(parameters)
    }
}

impl<T: IndividualLogLikelihood + ?Sized> IndividualLogLikelihood for Box<T> {
    fn id(&self) -> Option<&str> {
        (**self).id()
    }
}

pub(crate) fn check_length(expected: usize, parameters: &[f64]) -> Result<(), PopulationError> {
    if parameters.len() != expected {
        return Err(PopulationError::ParameterCount {
            expected,
            found: parameters.len(),
        });
    }
    Ok(())
}
