use ndarray::{Array1, Array2, ArrayView2};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{GradientLayout, PopulationModel, Sensitivities};
use crate::error::PopulationError;
use crate::reduce::ParameterReducer;

/// A population model with some of its parameters pinned to constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReducedPopulationModel {
    model: Box<PopulationModel>,
    reducer: ParameterReducer,
}

impl ReducedPopulationModel {
    /// Wraps `model` with all parameters free.
    ///
    /// Models containing a heterogeneous model are rejected: their parameters
    /// are individual-level values whose number changes with `n_ids`.
    pub fn new(model: PopulationModel) -> Result<Self, PopulationError> {
        if !model.heterogeneous_n_ids().is_empty() {
            return Err(PopulationError::InvalidModel(
                "Heterogeneous population models cannot be reduced".to_string(),
            ));
        }
        let reducer = ParameterReducer::new(model.n_parameters());
        Ok(Self {
            model: Box::new(model),
            reducer,
        })
    }

    /// Fixes (`Some`) or frees (`None`) parameters of the wrapped model by name.
    ///
    /// Names are those of the wrapped model, including dimension names.
    pub fn fix_parameters<I, S>(&mut self, updates: I) -> Result<(), PopulationError>
    where
        I: IntoIterator<Item = (S, Option<f64>)>,
        S: AsRef<str>,
    {
        let names = self.model.get_parameter_names(false);
        self.reducer.fix(&names, updates)
    }

    pub fn n_fixed_parameters(&self) -> usize {
        self.reducer.n_fixed()
    }

    pub fn population_model(&self) -> &PopulationModel {
        &self.model
    }

    pub fn into_inner(self) -> PopulationModel {
        *self.model
    }

    pub(crate) fn model_mut(&mut self) -> &mut PopulationModel {
        &mut self.model
    }

    pub(crate) fn n_parameters(&self) -> usize {
        self.reducer.n_free()
    }

    pub(crate) fn parameter_names(&self, exclude_dim_names: bool) -> Vec<String> {
        self.reducer
            .project(&self.model.get_parameter_names(exclude_dim_names))
    }

    /// Renames the free parameters; fixed parameters keep their names.
    pub(crate) fn set_parameter_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        let names = match names {
            None => return self.model.set_parameter_names(None),
            Some(names) => names,
        };
        if names.len() != self.reducer.n_free() {
            return Err(PopulationError::NameLength {
                expected: self.reducer.n_free(),
                found: names.len(),
            });
        }
        let mut full = self.model.get_parameter_names(true);
        for (&index, name) in self.reducer.free_indices().iter().zip(names) {
            full[index] = name;
        }
        self.model.set_parameter_names(Some(full))
    }

    pub(crate) fn project_gradient(&self, full: &[f64]) -> Vec<f64> {
        self.reducer.project(full)
    }

    pub(crate) fn log_likelihood(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<f64, PopulationError> {
        let full = self.reducer.embed(theta)?;
        self.model.compute_log_likelihood(&full, psi, covariates)
    }

    pub(crate) fn pointwise(&self, theta: &[f64], psi: ArrayView2<f64>) -> Result<Array1<f64>, PopulationError> {
        let full = self.reducer.embed(theta)?;
        self.model.compute_pointwise_ll(&full, psi)
    }

    pub(crate) fn sensitivities(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
        covariates: Option<ArrayView2<f64>>,
        layout: GradientLayout,
    ) -> Result<Sensitivities, PopulationError> {
        let full = self.reducer.embed(theta)?;
        let mut sens = self
            .model
            .compute_sensitivities(&full, psi, dlogp_dpsi, covariates, layout)?;
        sens.dtheta = self.reducer.project_columns(&sens.dtheta);
        Ok(sens)
    }

    pub(crate) fn individual_parameters(
        &self,
        theta: &[f64],
        eta: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        let full = self.reducer.embed(theta)?;
        self.model.compute_individual_parameters(&full, eta, covariates)
    }

    pub(crate) fn sample(
        &self,
        theta: &[f64],
        n_samples: usize,
        rng: &mut dyn RngCore,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        let full = self.reducer.embed(theta)?;
        self.model.sample(&full, n_samples, rng, covariates)
    }

    pub(crate) fn mean_and_std(&self, theta: &[f64]) -> Result<(Array1<f64>, Array1<f64>), PopulationError> {
        let full = self.reducer.embed(theta)?;
        self.model.get_mean_and_std(&full)
    }
}
