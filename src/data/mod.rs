pub mod residual_error;

use serde::{Deserialize, Serialize};

use crate::error::PopulationError;

pub use residual_error::{ErrorModel, ResidualErrorModel};

/// Measurements of one individual, one series per model output.
///
/// Each output may be measured at its own times. The model is simulated once
/// on the sorted union of all measurement times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observations {
    times: Vec<f64>,
    outputs: Vec<OutputSeries>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OutputSeries {
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl Observations {
    /// `times[k]` and `values[k]` are the measurement times and values of output `k`.
    pub fn new(times: Vec<Vec<f64>>, values: Vec<Vec<f64>>) -> Result<Self, PopulationError> {
        if times.len() != values.len() {
            return Err(PopulationError::Observations(format!(
                "{} time series for {} value series",
                times.len(),
                values.len()
            )));
        }
        for (k, (t, v)) in times.iter().zip(&values).enumerate() {
            if t.len() != v.len() {
                return Err(PopulationError::Observations(format!(
                    "output {} has {} times but {} values",
                    k + 1,
                    t.len(),
                    v.len()
                )));
            }
            if t.iter().chain(v).any(|x| !x.is_finite()) {
                return Err(PopulationError::Observations(format!(
                    "output {} contains non-finite entries",
                    k + 1
                )));
            }
        }

        let mut union: Vec<f64> = times.iter().flatten().copied().collect();
        union.sort_by(f64::total_cmp);
        union.dedup();

        let outputs = times
            .iter()
            .zip(values)
            .map(|(t, values)| OutputSeries {
                indices: t
                    .iter()
                    .map(|time| union.partition_point(|candidate| candidate < time))
                    .collect(),
                values,
            })
            .collect();
        Ok(Self {
            times: union,
            outputs,
        })
    }

    /// A single measured output.
    pub fn single(times: Vec<f64>, values: Vec<f64>) -> Result<Self, PopulationError> {
        Self::new(vec![times], vec![values])
    }

    /// Sorted union of all measurement times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn n_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn n_observations(&self) -> usize {
        self.outputs.iter().map(|output| output.values.len()).sum()
    }

    /// Positions in [`Observations::times`] and values of output `k`.
    pub fn output(&self, k: usize) -> (&[usize], &[f64]) {
        let series = &self.outputs[k];
        (&series.indices, &series.values)
    }
}
