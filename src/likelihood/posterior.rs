use super::{check_length, HierarchicalLogLikelihood, IndividualLogLikelihood, LogPdf, LogPrior};
use crate::error::PopulationError;

/// Unnormalised log-posterior: log-prior plus log-likelihood.
#[derive(Debug, Clone)]
pub struct LogPosterior<L: LogPdf> {
    log_likelihood: L,
    log_prior: LogPrior,
}

impl<L: LogPdf> LogPosterior<L> {
    pub fn new(log_likelihood: L, log_prior: LogPrior) -> Result<Self, PopulationError> {
        if log_prior.n_parameters() != log_likelihood.n_parameters() {
            return Err(PopulationError::Prior(format!(
                "The log-prior has to have as many parameters as the log-likelihood ({}), found {}",
                log_likelihood.n_parameters(),
                log_prior.n_parameters()
            )));
        }
        Ok(Self {
            log_likelihood,
            log_prior,
        })
    }

    pub fn log_likelihood(&self) -> &L {
        &self.log_likelihood
    }

    pub fn log_prior(&self) -> &LogPrior {
        &self.log_prior
    }
}

impl<L: LogPdf> LogPdf for LogPosterior<L> {
    fn n_parameters(&self) -> usize {
        self.log_likelihood.n_parameters()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.log_likelihood.parameter_names()
    }

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError> {
        let prior = self.log_prior.evaluate(parameters)?;
        if prior == f64::NEG_INFINITY {
            return Ok(prior);
        }
        Ok(prior + self.log_likelihood.evaluate(parameters)?)
    }

    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError> {
        let (prior, prior_gradient) = self.log_prior.evaluate_s1(parameters)?;
        if prior == f64::NEG_INFINITY {
            return Ok((prior, prior_gradient));
        }
        let (score, mut gradient) = self.log_likelihood.evaluate_s1(parameters)?;
        if score == f64::NEG_INFINITY {
            return Ok((score, gradient));
        }
        for (g, dg) in gradient.iter_mut().zip(prior_gradient) {
            *g += dg;
        }
        Ok((prior + score, gradient))
    }
}

/// Log-posterior of a hierarchical model.
///
/// The prior covers the top-level parameters only. The bottom-level
/// parameters are already scored by the population models.
#[derive(Debug, Clone)]
pub struct HierarchicalLogPosterior<L: IndividualLogLikelihood = Box<dyn IndividualLogLikelihood>> {
    log_likelihood: HierarchicalLogLikelihood<L>,
    log_prior: LogPrior,
    top_level: Vec<usize>,
}

impl<L: IndividualLogLikelihood> HierarchicalLogPosterior<L> {
    pub fn new(
        log_likelihood: HierarchicalLogLikelihood<L>,
        log_prior: LogPrior,
    ) -> Result<Self, PopulationError> {
        let n_top = log_likelihood.n_parameters(true);
        if log_prior.n_parameters() != n_top {
            return Err(PopulationError::Prior(format!(
                "The log-prior has to have as many parameters as the top level of the log-likelihood ({}), found {}",
                n_top,
                log_prior.n_parameters()
            )));
        }
        let top_level = log_likelihood
            .top_level_mask()
            .iter()
            .enumerate()
            .filter_map(|(index, &top)| top.then_some(index))
            .collect();
        Ok(Self {
            log_likelihood,
            log_prior,
            top_level,
        })
    }

    pub fn log_likelihood(&self) -> &HierarchicalLogLikelihood<L> {
        &self.log_likelihood
    }

    pub fn log_prior(&self) -> &LogPrior {
        &self.log_prior
    }

    pub fn get_id(&self) -> Vec<Option<String>> {
        self.log_likelihood.get_id()
    }

    fn top_level_values(&self, parameters: &[f64]) -> Vec<f64> {
        self.top_level.iter().map(|&index| parameters[index]).collect()
    }
}

impl<L: IndividualLogLikelihood> LogPdf for HierarchicalLogPosterior<L> {
    fn n_parameters(&self) -> usize {
        self.log_likelihood.n_parameters(false)
    }

    fn parameter_names(&self) -> Vec<String> {
        LogPdf::parameter_names(&self.log_likelihood)
    }

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError> {
        check_length(self.n_parameters(), parameters)?;
        let prior = self.log_prior.evaluate(&self.top_level_values(parameters))?;
        if prior == f64::NEG_INFINITY {
            return Ok(prior);
        }
        Ok(prior + self.log_likelihood.evaluate(parameters)?)
    }

    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError> {
        check_length(self.n_parameters(), parameters)?;
        let (prior, prior_gradient) = self.log_prior.evaluate_s1(&self.top_level_values(parameters))?;
        if prior == f64::NEG_INFINITY {
            return Ok((prior, vec![0.0; parameters.len()]));
        }
        let (score, mut gradient) = self.log_likelihood.evaluate_s1(parameters)?;
        if score == f64::NEG_INFINITY {
            return Ok((score, gradient));
        }
        for (&index, dg) in self.top_level.iter().zip(prior_gradient) {
            gradient[index] += dg;
        }
        Ok((prior + score, gradient))
    }
}
