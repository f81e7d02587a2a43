use std::ops::Range;

use ndarray::{Array1, Array2};
use tracing::warn;

use super::{check_length, IndividualLogLikelihood, LogPdf};
use crate::data::{ErrorModel, Observations, ResidualErrorModel};
use crate::error::PopulationError;
use crate::simulator::MechanisticModel;

/// Log-likelihood of one individual's measurements under a mechanistic model
/// and one error model per output.
///
/// The parameters are the mechanistic parameters followed by the parameters
/// of each output's error model, e.g.
/// `[a0, ke, v, central.drug_concentration Sigma base]`.
#[derive(Debug, Clone)]
pub struct LogLikelihood<M: MechanisticModel, E: ErrorModel = ResidualErrorModel> {
    model: M,
    error_models: Vec<E>,
    observations: Observations,
    id: Option<String>,
    error_ranges: Vec<Range<usize>>,
}

impl<M: MechanisticModel, E: ErrorModel> LogLikelihood<M, E> {
    pub fn new(
        model: M,
        error_models: Vec<E>,
        observations: Observations,
    ) -> Result<Self, PopulationError> {
        let n_outputs = model.n_outputs();
        if error_models.len() != n_outputs {
            return Err(PopulationError::LikelihoodMismatch(format!(
                "{} error models for {} model outputs",
                error_models.len(),
                n_outputs
            )));
        }
        if observations.n_outputs() != n_outputs {
            return Err(PopulationError::Observations(format!(
                "{} observed outputs for {} model outputs",
                observations.n_outputs(),
                n_outputs
            )));
        }

        let mut start = model.n_parameters();
        let error_ranges = error_models
            .iter()
            .map(|error_model| {
                let range = start..start + error_model.n_parameters();
                start = range.end;
                range
            })
            .collect();
        Ok(Self {
            model,
            error_models,
            observations,
            id: None,
            error_ranges,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn mechanistic_model(&self) -> &M {
        &self.model
    }

    pub fn observations(&self) -> &Observations {
        &self.observations
    }

    pub fn n_observations(&self) -> usize {
        self.observations.n_observations()
    }
}

impl<M: MechanisticModel, E: ErrorModel> LogPdf for LogLikelihood<M, E> {
    fn n_parameters(&self) -> usize {
        self.error_ranges
            .last()
            .map_or(self.model.n_parameters(), |range| range.end)
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names = self.model.parameter_names();
        for (output, error_model) in self.model.output_names().iter().zip(&self.error_models) {
            names.extend(
                error_model
                    .parameter_names()
                    .into_iter()
                    .map(|name| format!("{} {}", output, name)),
            );
        }
        names
    }

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError> {
        check_length(self.n_parameters(), parameters)?;
        let n_structural = self.model.n_parameters();
        let outputs = match self
            .model
            .simulate(&parameters[..n_structural], self.observations.times())
        {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!("Simulation rejected the parameters: {}", e);
                return Ok(f64::NEG_INFINITY);
            }
        };

        let mut score = 0.0;
        for (k, (error_model, range)) in self.error_models.iter().zip(&self.error_ranges).enumerate() {
            let (indices, values) = self.observations.output(k);
            let predictions: Array1<f64> = indices.iter().map(|&i| outputs[[i, k]]).collect();
            score += error_model.compute_log_likelihood(
                &parameters[range.clone()],
                predictions.view(),
                Array1::from(values.to_vec()).view(),
            );
            if score == f64::NEG_INFINITY {
                break;
            }
        }
        Ok(score)
    }

    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError> {
        check_length(self.n_parameters(), parameters)?;
        let n_structural = self.model.n_parameters();
        let rejected = (f64::NEG_INFINITY, vec![0.0; parameters.len()]);
        let (outputs, sensitivities) = match self
            .model
            .simulate_with_sensitivities(&parameters[..n_structural], self.observations.times())
        {
            Ok(simulation) => simulation,
            Err(e) => {
                warn!("Simulation rejected the parameters: {}", e);
                return Ok(rejected);
            }
        };

        let mut score = 0.0;
        let mut gradient = vec![0.0; parameters.len()];
        for (k, (error_model, range)) in self.error_models.iter().zip(&self.error_ranges).enumerate() {
            let (indices, values) = self.observations.output(k);
            let predictions: Array1<f64> = indices.iter().map(|&i| outputs[[i, k]]).collect();
            let output_sens = Array2::from_shape_fn((indices.len(), n_structural), |(j, p)| {
                sensitivities[[indices[j], k, p]]
            });
            let (output_score, output_gradient) = error_model.compute_sensitivities(
                &parameters[range.clone()],
                predictions.view(),
                output_sens.view(),
                Array1::from(values.to_vec()).view(),
            );
            if output_score == f64::NEG_INFINITY {
                return Ok(rejected);
            }
            score += output_score;
            for (g, dg) in gradient[..n_structural].iter_mut().zip(output_gradient.iter()) {
                *g += dg;
            }
            for (g, dg) in gradient[range.clone()]
                .iter_mut()
                .zip(output_gradient.iter().skip(n_structural))
            {
                *g += dg;
            }
        }
        Ok((score, gradient))
    }
}

impl<M: MechanisticModel, E: ErrorModel> IndividualLogLikelihood for LogLikelihood<M, E> {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}
