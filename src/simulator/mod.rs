//! Mechanistic models.
//!
//! The hierarchical machinery never integrates a model itself. It consumes a
//! [`MechanisticModel`] that maps structural parameters and measurement times
//! to model outputs, optionally with their parameter sensitivities.

pub mod analytical;

use ndarray::{Array2, Array3};

use crate::error::PopulationError;

pub use analytical::OneCompartmentModel;

pub trait MechanisticModel {
    fn n_parameters(&self) -> usize;

    fn parameter_names(&self) -> Vec<String>;

    fn n_outputs(&self) -> usize;

    fn output_names(&self) -> Vec<String>;

    /// Outputs at `times`, shape `(n_times, n_outputs)`.
    fn simulate(&self, parameters: &[f64], times: &[f64]) -> Result<Array2<f64>, PopulationError>;

    /// Outputs and their sensitivities, shapes `(n_times, n_outputs)` and
    /// `(n_times, n_outputs, n_parameters)`.
    fn simulate_with_sensitivities(
        &self,
        parameters: &[f64],
        times: &[f64],
    ) -> Result<(Array2<f64>, Array3<f64>), PopulationError>;
}
