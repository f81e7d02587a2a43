use ndarray::{Array2, Array3};

use super::MechanisticModel;
use crate::error::PopulationError;

/// Analytical one compartment model after an intravenous bolus at `t = 0`.
///
/// # Assumptions
/// - parameters are the initial amount `a0`, the elimination constant `ke`
///   and the volume of distribution `v`, in that order
/// - the single output is the central concentration `c(t) = a0 / v * exp(-ke * t)`
#[derive(Debug, Clone, Default)]
pub struct OneCompartmentModel;

impl OneCompartmentModel {
    pub fn new() -> Self {
        Self
    }

    fn check(&self, parameters: &[f64]) -> Result<(f64, f64, f64), PopulationError> {
        if parameters.len() != 3 {
            return Err(PopulationError::ParameterCount {
                expected: 3,
                found: parameters.len(),
            });
        }
        let (a0, ke, v) = (parameters[0], parameters[1], parameters[2]);
        if v <= 0.0 {
            return Err(PopulationError::Simulation(format!(
                "the volume of distribution must be positive, got {}",
                v
            )));
        }
        Ok((a0, ke, v))
    }
}

impl MechanisticModel for OneCompartmentModel {
    fn n_parameters(&self) -> usize {
        3
    }

    fn parameter_names(&self) -> Vec<String> {
        vec![
            "central.drug_amount".to_string(),
            "central.elimination_rate".to_string(),
            "central.size".to_string(),
        ]
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn output_names(&self) -> Vec<String> {
        vec!["central.drug_concentration".to_string()]
    }

    fn simulate(&self, parameters: &[f64], times: &[f64]) -> Result<Array2<f64>, PopulationError> {
        let (a0, ke, v) = self.check(parameters)?;
        Ok(Array2::from_shape_fn((times.len(), 1), |(i, _)| {
            a0 / v * (-ke * times[i]).exp()
        }))
    }

    fn simulate_with_sensitivities(
        &self,
        parameters: &[f64],
        times: &[f64],
    ) -> Result<(Array2<f64>, Array3<f64>), PopulationError> {
        let (a0, ke, v) = self.check(parameters)?;
        let mut outputs = Array2::zeros((times.len(), 1));
        let mut sensitivities = Array3::zeros((times.len(), 1, 3));
        for (i, &t) in times.iter().enumerate() {
            let decay = (-ke * t).exp();
            let concentration = a0 / v * decay;
            outputs[[i, 0]] = concentration;
            sensitivities[[i, 0, 0]] = decay / v;
            sensitivities[[i, 0, 1]] = -t * concentration;
            sensitivities[[i, 0, 2]] = -concentration / v;
        }
        Ok((outputs, sensitivities))
    }
}
