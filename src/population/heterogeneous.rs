use ndarray::{Array1, Array2, ArrayView2};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::labels::Labels;
use super::Sensitivities;
use crate::error::PopulationError;

/// Every individual has its own unconstrained value.
///
/// The parameters of the model are the individual values themselves, laid
/// out individual-major: `[ID 1 dim 1, ID 1 dim 2, ID 2 dim 1, ...]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeterogeneousModel {
    labels: Labels,
    n_ids: usize,
}

impl HeterogeneousModel {
    pub fn new(n_dim: usize, n_ids: usize) -> Result<Self, PopulationError> {
        if n_ids < 1 {
            return Err(PopulationError::InvalidIds(n_ids));
        }
        Ok(Self {
            labels: Labels::new(n_dim)?,
            n_ids,
        })
    }

    pub fn n_ids(&self) -> usize {
        self.n_ids
    }

    /// Resizes the model. Custom parameter names are discarded.
    pub fn set_n_ids(&mut self, n_ids: usize) -> Result<(), PopulationError> {
        if n_ids < 1 {
            return Err(PopulationError::InvalidIds(n_ids));
        }
        self.n_ids = n_ids;
        self.labels.reset_parameter_names();
        Ok(())
    }

    pub(crate) fn labels(&self) -> &Labels {
        &self.labels
    }

    pub(crate) fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }

    pub(crate) fn n_parameters(&self) -> usize {
        self.n_ids * self.labels.n_dim()
    }

    pub(crate) fn default_names(&self) -> Vec<(String, usize)> {
        let n_dim = self.labels.n_dim();
        (1..=self.n_ids)
            .flat_map(|id| (0..n_dim).map(move |dim| (format!("ID {}", id), dim)))
            .collect()
    }

    pub(crate) fn pointwise(&self, psi: ArrayView2<f64>) -> Array1<f64> {
        Array1::zeros(psi.nrows())
    }

    pub(crate) fn sensitivities(
        &self,
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
    ) -> Sensitivities {
        let (n_ids, n_dim) = psi.dim();
        let dpsi = match dlogp_dpsi {
            Some(dlogp) => dlogp.to_owned(),
            None => Array2::zeros((n_ids, n_dim)),
        };
        Sensitivities {
            score: 0.0,
            dpsi,
            dtheta: Array2::zeros((n_ids, self.n_parameters())),
        }
    }

    /// Draws the parameters of a uniformly chosen individual.
    pub(crate) fn sample(&self, theta: &[f64], n_samples: usize, rng: &mut dyn RngCore) -> Array2<f64> {
        let n_dim = self.labels.n_dim();
        let mut samples = Array2::zeros((n_samples, n_dim));
        for mut row in samples.outer_iter_mut() {
            let id = rng.random_range(0..self.n_ids);
            for dim in 0..n_dim {
                row[dim] = theta[id * n_dim + dim];
            }
        }
        samples
    }
}
