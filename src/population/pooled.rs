use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::labels::{per_dimension_defaults, Labels};
use super::Sensitivities;
use crate::error::PopulationError;

/// All individuals share one value per dimension.
///
/// The population parameter *is* the individual parameter, so the model has
/// no bottom-level parameters and its likelihood is a hard constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PooledModel {
    labels: Labels,
}

impl PooledModel {
    pub fn new(n_dim: usize) -> Result<Self, PopulationError> {
        Ok(Self {
            labels: Labels::new(n_dim)?,
        })
    }

    pub(crate) fn labels(&self) -> &Labels {
        &self.labels
    }

    pub(crate) fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }

    pub(crate) fn default_names(&self) -> Vec<(String, usize)> {
        per_dimension_defaults(&["Pooled"], self.labels.n_dim())
    }

    /// Zero for individuals whose values equal the pooled values exactly, `-inf` otherwise.
    pub(crate) fn pointwise(&self, theta: &[f64], psi: ArrayView2<f64>) -> Array1<f64> {
        psi.outer_iter()
            .map(|row| {
                if row.iter().zip(theta).all(|(value, pooled)| value == pooled) {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            })
            .collect()
    }

    /// Downstream gradients are returned unchanged in `dpsi`; the constraint
    /// itself has no gradient with respect to θ.
    pub(crate) fn sensitivities(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
    ) -> Sensitivities {
        let (n_ids, n_dim) = psi.dim();
        let score = self.pointwise(theta, psi).sum();
        if score == f64::NEG_INFINITY {
            return Sensitivities::rejected(n_ids, n_dim, n_ids, n_dim);
        }
        let dpsi = match dlogp_dpsi {
            Some(dlogp) => dlogp.to_owned(),
            None => Array2::zeros((n_ids, n_dim)),
        };
        Sensitivities {
            score,
            dpsi,
            dtheta: Array2::zeros((n_ids, n_dim)),
        }
    }

    pub(crate) fn individual_parameters(&self, theta: &[f64], n_ids: usize) -> Array2<f64> {
        Array2::from_shape_fn((n_ids, theta.len()), |(_, dim)| theta[dim])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn exact_equality_is_required() {
        let model = PooledModel::new(1).unwrap();
        let psi = array![[1.0], [1.0], [1.0], [1.0]];
        assert_eq!(model.pointwise(&[1.0], psi.view()).sum(), 0.0);

        let psi = array![[0.0], [1.0], [1.0], [1.0]];
        assert_eq!(model.pointwise(&[1.0], psi.view()).sum(), f64::NEG_INFINITY);

        let psi = array![[1.0 + 1e-12]];
        assert_eq!(model.pointwise(&[1.0], psi.view())[0], f64::NEG_INFINITY);
    }

    #[test]
    fn downstream_gradient_passes_through_psi() {
        let model = PooledModel::new(1).unwrap();
        let psi = array![[1.0], [1.0], [1.0], [1.0]];
        let dlogp = Array2::from_elem((4, 1), 2.0);
        let sens = model.sensitivities(&[1.0], psi.view(), Some(dlogp.view()));
        assert_eq!(sens.score, 0.0);
        assert_eq!(sens.dpsi, dlogp);
        assert_eq!(sens.dtheta.sum_axis(ndarray::Axis(0)), array![0.0]);

        let sens = model.sensitivities(&[1.0], psi.view(), None);
        assert_eq!(sens.dpsi, Array2::<f64>::zeros((4, 1)));
    }
}
