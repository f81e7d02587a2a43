use super::{check_length, IndividualLogLikelihood, LogPdf};
use crate::error::PopulationError;
use crate::reduce::ParameterReducer;

/// A log-pdf with some of its parameters fixed to constants.
///
/// Only the free parameters are exposed. Gradients with respect to fixed
/// parameters are dropped.
#[derive(Debug, Clone)]
pub struct ReducedLogLikelihood<L: LogPdf> {
    inner: L,
    reducer: ParameterReducer,
}

impl<L: LogPdf> ReducedLogLikelihood<L> {
    pub fn new(inner: L) -> Self {
        let reducer = ParameterReducer::new(inner.n_parameters());
        Self { inner, reducer }
    }

    /// Fixes (`Some`) or frees (`None`) parameters of the wrapped log-pdf by name.
    pub fn fix_parameters<I, S>(&mut self, updates: I) -> Result<(), PopulationError>
    where
        I: IntoIterator<Item = (S, Option<f64>)>,
        S: AsRef<str>,
    {
        let names = self.inner.parameter_names();
        self.reducer.fix(&names, updates)
    }

    pub fn n_fixed_parameters(&self) -> usize {
        self.reducer.n_fixed()
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: LogPdf> LogPdf for ReducedLogLikelihood<L> {
    fn n_parameters(&self) -> usize {
        self.reducer.n_free()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.reducer.project(&self.inner.parameter_names())
    }

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError> {
        check_length(self.n_parameters(), parameters)?;
        self.inner.evaluate(&self.reducer.embed(parameters)?)
    }

    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError> {
        check_length(self.n_parameters(), parameters)?;
        let (score, gradient) = self.inner.evaluate_s1(&self.reducer.embed(parameters)?)?;
        Ok((score, self.reducer.project(&gradient)))
    }
}

impl<L: IndividualLogLikelihood> IndividualLogLikelihood for ReducedLogLikelihood<L> {
    fn id(&self) -> Option<&str> {
        self.inner.id()
    }
}
