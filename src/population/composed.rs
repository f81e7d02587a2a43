use std::ops::Range;

use ndarray::{s, Array2, ArrayView2};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{GradientLayout, PopulationModel, Sensitivities};
use crate::error::PopulationError;

/// Several population models side by side.
///
/// Dimensions, parameters and covariates are the ordered concatenation of the
/// children's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComposedPopulationModel {
    models: Vec<PopulationModel>,
}

/// Consecutive ranges of lengths `sizes`.
fn partition(sizes: impl Iterator<Item = usize>) -> Vec<Range<usize>> {
    let mut start = 0;
    sizes
        .map(|size| {
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

impl ComposedPopulationModel {
    pub fn new(models: Vec<PopulationModel>) -> Result<Self, PopulationError> {
        if models.is_empty() {
            return Err(PopulationError::InvalidModel(
                "A composed population model needs at least one population model".to_string(),
            ));
        }
        let n_ids: Vec<usize> = models
            .iter()
            .flat_map(|model| model.heterogeneous_n_ids())
            .collect();
        if n_ids.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(PopulationError::InvalidModel(
                "All population models must have the same n_ids".to_string(),
            ));
        }
        Ok(Self { models })
    }

    pub fn population_models(&self) -> &[PopulationModel] {
        &self.models
    }

    pub(crate) fn models_mut(&mut self) -> &mut [PopulationModel] {
        &mut self.models
    }

    pub(crate) fn dim_ranges(&self) -> Vec<Range<usize>> {
        partition(self.models.iter().map(|model| model.n_dim()))
    }

    pub(crate) fn parameter_ranges(&self) -> Vec<Range<usize>> {
        partition(self.models.iter().map(|model| model.n_parameters()))
    }

    pub(crate) fn covariate_ranges(&self) -> Vec<Range<usize>> {
        partition(self.models.iter().map(|model| model.n_covariates()))
    }

    pub(crate) fn top_level_ranges(&self, n_ids: usize) -> Vec<Range<usize>> {
        partition(
            self.models
                .iter()
                .map(|model| model.n_hierarchical_parameters(n_ids).1),
        )
    }

    pub(crate) fn set_names_by_child(
        &mut self,
        names: Option<Vec<String>>,
        ranges: Vec<Range<usize>>,
        total: usize,
        set: fn(&mut PopulationModel, Option<Vec<String>>) -> Result<(), PopulationError>,
    ) -> Result<(), PopulationError> {
        if let Some(names) = &names {
            if names.len() != total {
                return Err(PopulationError::NameLength {
                    expected: total,
                    found: names.len(),
                });
            }
        }
        for (model, range) in self.models.iter_mut().zip(ranges) {
            let child_names = names.as_ref().map(|names| names[range].to_vec());
            set(model, child_names)?;
        }
        Ok(())
    }

    fn child_covariates<'a>(
        covariates: Option<ArrayView2<'a, f64>>,
        range: &Range<usize>,
    ) -> Option<ArrayView2<'a, f64>> {
        if range.is_empty() {
            return None;
        }
        covariates.map(|covariates| covariates.slice_move(s![.., range.clone()]))
    }

    fn check_covariates(&self, covariates: Option<ArrayView2<f64>>) -> Result<(), PopulationError> {
        let n_covariates = self.covariate_ranges().last().map_or(0, |range| range.end);
        match covariates {
            Some(covariates) if n_covariates > 0 && covariates.ncols() != n_covariates => {
                Err(PopulationError::Covariates {
                    expected: n_covariates,
                    found: covariates.ncols(),
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn log_likelihood(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<f64, PopulationError> {
        self.check_covariates(covariates)?;
        let mut score = 0.0;
        for (((model, params), dims), covs) in self
            .models
            .iter()
            .zip(self.parameter_ranges())
            .zip(self.dim_ranges())
            .zip(self.covariate_ranges())
        {
            score += model.compute_log_likelihood(
                &theta[params],
                psi.slice(s![.., dims]),
                Self::child_covariates(covariates, &covs),
            )?;
        }
        Ok(score)
    }

    pub(crate) fn sensitivities(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
        covariates: Option<ArrayView2<f64>>,
        layout: GradientLayout,
    ) -> Result<Sensitivities, PopulationError> {
        self.check_covariates(covariates)?;
        let n_ids = psi.nrows();
        let rows = match layout {
            GradientLayout::Flattened => 1,
            GradientLayout::PerIndividual => n_ids,
        };
        let mut score = 0.0;
        let mut dpsi = Array2::zeros(psi.dim());
        let mut dtheta = Array2::zeros((rows, theta.len()));
        for (((model, params), dims), covs) in self
            .models
            .iter()
            .zip(self.parameter_ranges())
            .zip(self.dim_ranges())
            .zip(self.covariate_ranges())
        {
            let child = model.compute_sensitivities(
                &theta[params.clone()],
                psi.slice(s![.., dims.clone()]),
                dlogp_dpsi.map(|dlogp| dlogp.slice_move(s![.., dims.clone()])),
                Self::child_covariates(covariates, &covs),
                layout,
            )?;
            score += child.score;
            dpsi.slice_mut(s![.., dims]).assign(&child.dpsi);
            dtheta.slice_mut(s![.., params]).assign(&child.dtheta);
        }
        Ok(Sensitivities {
            score,
            dpsi,
            dtheta,
        })
    }

    pub(crate) fn individual_parameters(
        &self,
        theta: &[f64],
        eta: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        self.check_covariates(covariates)?;
        let mut psi = Array2::zeros(eta.dim());
        for (((model, params), dims), covs) in self
            .models
            .iter()
            .zip(self.parameter_ranges())
            .zip(self.dim_ranges())
            .zip(self.covariate_ranges())
        {
            let child = model.compute_individual_parameters(
                &theta[params],
                eta.slice(s![.., dims.clone()]),
                Self::child_covariates(covariates, &covs),
            )?;
            psi.slice_mut(s![.., dims]).assign(&child);
        }
        Ok(psi)
    }

    pub(crate) fn sample(
        &self,
        theta: &[f64],
        n_samples: usize,
        rng: &mut dyn RngCore,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        self.check_covariates(covariates)?;
        let n_dim = self.dim_ranges().last().map_or(0, |range| range.end);
        let mut samples = Array2::zeros((n_samples, n_dim));
        for (((model, params), dims), covs) in self
            .models
            .iter()
            .zip(self.parameter_ranges())
            .zip(self.dim_ranges())
            .zip(self.covariate_ranges())
        {
            let child = model.sample(
                &theta[params],
                n_samples,
                rng,
                Self::child_covariates(covariates, &covs),
            )?;
            samples.slice_mut(s![.., dims]).assign(&child);
        }
        Ok(samples)
    }
}
