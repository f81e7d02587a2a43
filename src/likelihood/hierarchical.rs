//! Hierarchical log-likelihood.
//!
//! Couples the log-likelihoods of `n_ids` individuals through one population
//! model per structural parameter (or per contiguous group of structural
//! parameters). The flat parameter vector is laid out per population model as
//!
//! ```text
//! [bottom-level block | top-level block]
//! ```
//!
//! The bottom-level block holds the latent values η of every individual,
//! individual-major over the dimensions that carry bottom-level values (pooled
//! dimensions carry none). The top-level block holds the population
//! parameters θ.

use std::ops::Range;

use ndarray::{aview1, s, Array2, ArrayView2, Axis};
use tracing::{debug, trace};

use super::{check_length, IndividualLogLikelihood, LogPdf};
use crate::error::PopulationError;
use crate::population::{GradientLayout, PopulationModel};

#[derive(Debug, Clone)]
struct Block {
    /// Structural parameters governed by the population model.
    dims: Range<usize>,
    /// Local dimensions with bottom-level values.
    bottom_dims: Vec<usize>,
    /// Local dimensions without bottom-level values.
    pooled_dims: Vec<usize>,
    bottom: Range<usize>,
    top: Range<usize>,
    covariates: Range<usize>,
}

/// θ, η and ψ of one population model at a given parameter vector.
struct PopulationState {
    theta: Vec<f64>,
    /// Latent values, pooled dimensions filled with their ψ.
    eta: Array2<f64>,
    psi: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct HierarchicalLogLikelihood<L: IndividualLogLikelihood = Box<dyn IndividualLogLikelihood>> {
    log_likelihoods: Vec<L>,
    population_models: Vec<PopulationModel>,
    covariates: Option<Array2<f64>>,
    ids: Vec<String>,
    blocks: Vec<Block>,
    n_structural: usize,
    n_parameters: usize,
}

impl<L: IndividualLogLikelihood> HierarchicalLogLikelihood<L> {
    /// Composes the individual log-likelihoods with one population model per
    /// contiguous group of structural parameters.
    ///
    /// The dimensions of each population model are renamed after the
    /// structural parameters they govern.
    pub fn new(
        log_likelihoods: Vec<L>,
        mut population_models: Vec<PopulationModel>,
    ) -> Result<Self, PopulationError> {
        let first = log_likelihoods.first().ok_or(PopulationError::InvalidIds(0))?;
        let n_structural = first.n_parameters();
        let names = first.parameter_names();
        if log_likelihoods.iter().any(|l| l.n_parameters() != n_structural) {
            return Err(PopulationError::LikelihoodMismatch(
                "The number of parameters of the log-likelihoods must be equal".to_string(),
            ));
        }
        if log_likelihoods.iter().any(|l| l.parameter_names() != names) {
            return Err(PopulationError::LikelihoodMismatch(
                "The parameter names of the log-likelihoods must be equal".to_string(),
            ));
        }
        let covered: usize = population_models.iter().map(|pm| pm.n_dim()).sum();
        if covered != n_structural {
            return Err(PopulationError::PopulationModelCount {
                expected: n_structural,
                found: covered,
            });
        }

        let n_ids = log_likelihoods.len();
        let ids = log_likelihoods
            .iter()
            .enumerate()
            .map(|(k, l)| {
                l.id()
                    .map_or_else(|| format!("automatic-id-{}", k + 1), str::to_string)
            })
            .collect();

        let mut blocks = Vec::with_capacity(population_models.len());
        let (mut dim, mut position, mut covariate) = (0, 0, 0);
        for pm in population_models.iter_mut() {
            let n_dim = pm.n_dim();
            pm.set_dim_names(Some(names[dim..dim + n_dim].to_vec()))?;
            pm.set_n_ids(n_ids)?;

            let (n_bottom, n_top) = pm.n_hierarchical_parameters(n_ids);
            let flags = pm.bottom_dims();
            let bottom_dims: Vec<usize> = (0..n_dim).filter(|&d| flags[d]).collect();
            let pooled_dims = (0..n_dim).filter(|&d| !flags[d]).collect();
            debug_assert_eq!(n_bottom, n_ids * bottom_dims.len());

            blocks.push(Block {
                dims: dim..dim + n_dim,
                bottom_dims,
                pooled_dims,
                bottom: position..position + n_bottom,
                top: position + n_bottom..position + n_bottom + n_top,
                covariates: covariate..covariate + pm.n_covariates(),
            });
            dim += n_dim;
            position += n_bottom + n_top;
            covariate += pm.n_covariates();
        }

        debug!(
            "Hierarchical log-likelihood with {} individuals, {} population models and {} parameters",
            n_ids,
            population_models.len(),
            position
        );
        Ok(Self {
            log_likelihoods,
            population_models,
            covariates: None,
            ids,
            blocks,
            n_structural,
            n_parameters: position,
        })
    }

    /// Attaches covariates of shape `(n_ids, n_covariates)`.
    ///
    /// Columns are handed to the population models in order, each taking as
    /// many as it has covariates.
    pub fn with_covariates(mut self, covariates: Array2<f64>) -> Result<Self, PopulationError> {
        let n_covariates = self.blocks.last().map_or(0, |block| block.covariates.end);
        if covariates.nrows() != self.ids.len() {
            return Err(PopulationError::Rows {
                what: "covariates",
                expected: self.ids.len(),
                found: covariates.nrows(),
            });
        }
        if covariates.ncols() != n_covariates {
            return Err(PopulationError::Covariates {
                expected: n_covariates,
                found: covariates.ncols(),
            });
        }
        self.covariates = Some(covariates);
        Ok(self)
    }

    pub fn n_ids(&self) -> usize {
        self.ids.len()
    }

    /// Number of parameters, optionally counting only the top level.
    pub fn n_parameters(&self, exclude_bottom_level: bool) -> usize {
        if exclude_bottom_level {
            self.blocks.iter().map(|block| block.top.len()).sum()
        } else {
            self.n_parameters
        }
    }

    /// Names of the parameters in the order of the flat parameter vector.
    ///
    /// Bottom-level names are the structural parameter names, prefixed with
    /// the individual's ID when `include_ids` is set.
    pub fn get_parameter_names(&self, exclude_bottom_level: bool, include_ids: bool) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_parameters(exclude_bottom_level));
        for (pm, block) in self.population_models.iter().zip(&self.blocks) {
            if !exclude_bottom_level {
                let dim_names = pm.get_dim_names();
                for id in &self.ids {
                    for &d in &block.bottom_dims {
                        names.push(if include_ids {
                            format!("{} {}", id, dim_names[d])
                        } else {
                            dim_names[d].clone()
                        });
                    }
                }
            }
            names.extend(pm.top_level_names());
        }
        names
    }

    /// Per parameter, the ID of the individual it belongs to, or `None` for
    /// top-level parameters.
    pub fn get_id(&self) -> Vec<Option<String>> {
        let mut ids = vec![None; self.n_parameters];
        for block in &self.blocks {
            let n_bottom = block.bottom_dims.len();
            for (offset, slot) in ids[block.bottom.clone()].iter_mut().enumerate() {
                *slot = Some(self.ids[offset / n_bottom].clone());
            }
        }
        ids
    }

    /// Whether each parameter of the flat vector is a top-level parameter.
    pub fn top_level_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_parameters];
        for block in &self.blocks {
            mask[block.top.clone()].fill(true);
        }
        mask
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn population_models(&self) -> &[PopulationModel] {
        &self.population_models
    }

    pub fn log_likelihoods(&self) -> &[L] {
        &self.log_likelihoods
    }

    pub fn n_log_likelihoods(&self) -> usize {
        self.log_likelihoods.len()
    }

    /// Structural parameters ψ of every individual, shape `(n_ids, n_structural)`.
    pub fn compute_individual_parameters(&self, parameters: &[f64]) -> Result<Array2<f64>, PopulationError> {
        check_length(self.n_parameters, parameters)?;
        let states = self.population_states(parameters)?;
        Ok(self.structural_parameters(&states))
    }

    fn block_covariates(&self, block: &Block) -> Option<ArrayView2<'_, f64>> {
        if block.covariates.is_empty() {
            return None;
        }
        self.covariates
            .as_ref()
            .map(|covariates| covariates.slice(s![.., block.covariates.clone()]))
    }

    fn population_states(&self, parameters: &[f64]) -> Result<Vec<PopulationState>, PopulationError> {
        let n_ids = self.ids.len();
        self.population_models
            .iter()
            .zip(&self.blocks)
            .map(|(pm, block)| {
                let n_bottom = block.bottom_dims.len();
                let mut eta = Array2::zeros((n_ids, block.dims.len()));
                for i in 0..n_ids {
                    for (b, &d) in block.bottom_dims.iter().enumerate() {
                        eta[[i, d]] = parameters[block.bottom.start + i * n_bottom + b];
                    }
                }
                let theta = pm.expand_top_level(&parameters[block.top.clone()], eta.view());
                let psi =
                    pm.compute_individual_parameters(&theta, eta.view(), self.block_covariates(block))?;
                for &d in &block.pooled_dims {
                    eta.column_mut(d).assign(&psi.column(d));
                }
                Ok(PopulationState { theta, eta, psi })
            })
            .collect()
    }

    fn structural_parameters(&self, states: &[PopulationState]) -> Array2<f64> {
        let mut psi = Array2::zeros((self.ids.len(), self.n_structural));
        for (state, block) in states.iter().zip(&self.blocks) {
            psi.slice_mut(s![.., block.dims.clone()]).assign(&state.psi);
        }
        psi
    }

    /// Sum of the population log-likelihoods, `None` once one rejects.
    fn population_score(&self, states: &[PopulationState]) -> Result<Option<f64>, PopulationError> {
        let mut score = 0.0;
        for ((pm, block), state) in self.population_models.iter().zip(&self.blocks).zip(states) {
            let ll = pm.compute_log_likelihood(
                &state.theta,
                state.eta.view(),
                self.block_covariates(block),
            )?;
            if ll == f64::NEG_INFINITY {
                trace!("The {} population model rejected the parameters", pm.kind());
                return Ok(None);
            }
            score += ll;
        }
        Ok(Some(score))
    }
}

impl<L: IndividualLogLikelihood> LogPdf for HierarchicalLogLikelihood<L> {
    fn n_parameters(&self) -> usize {
        self.n_parameters
    }

    /// Names including the individual IDs, so that every name is unique.
    fn parameter_names(&self) -> Vec<String> {
        self.get_parameter_names(false, true)
    }

    fn evaluate(&self, parameters: &[f64]) -> Result<f64, PopulationError> {
        check_length(self.n_parameters, parameters)?;
        let states = self.population_states(parameters)?;
        let Some(mut score) = self.population_score(&states)? else {
            return Ok(f64::NEG_INFINITY);
        };

        let psi = self.structural_parameters(&states);
        for (l, row) in self.log_likelihoods.iter().zip(psi.rows()) {
            score += l.evaluate(&row.to_vec())?;
            if score == f64::NEG_INFINITY {
                trace!("An individual log-likelihood rejected the parameters");
                break;
            }
        }
        Ok(score)
    }

    fn evaluate_s1(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>), PopulationError> {
        check_length(self.n_parameters, parameters)?;
        let rejected = (f64::NEG_INFINITY, vec![0.0; self.n_parameters]);
        let states = self.population_states(parameters)?;
        let Some(mut score) = self.population_score(&states)? else {
            return Ok(rejected);
        };

        let psi = self.structural_parameters(&states);
        let mut dlogp = Array2::zeros(psi.dim());
        for ((l, row), mut gradient) in self
            .log_likelihoods
            .iter()
            .zip(psi.rows())
            .zip(dlogp.rows_mut())
        {
            let (individual_score, individual_gradient) = l.evaluate_s1(&row.to_vec())?;
            if individual_score == f64::NEG_INFINITY {
                trace!("An individual log-likelihood rejected the parameters");
                return Ok(rejected);
            }
            score += individual_score;
            gradient.assign(&aview1(&individual_gradient));
        }

        let mut gradient = vec![0.0; self.n_parameters];
        for ((pm, block), state) in self.population_models.iter().zip(&self.blocks).zip(&states) {
            let sens = pm.compute_sensitivities(
                &state.theta,
                state.eta.view(),
                Some(dlogp.slice(s![.., block.dims.clone()])),
                self.block_covariates(block),
                GradientLayout::Flattened,
            )?;
            let n_bottom = block.bottom_dims.len();
            for i in 0..self.ids.len() {
                for (b, &d) in block.bottom_dims.iter().enumerate() {
                    gradient[block.bottom.start + i * n_bottom + b] = sens.dpsi[[i, d]];
                }
            }
            // Pooled ψ equals θ for every individual
            let dpsi_total = sens.dpsi.sum_axis(Axis(0)).to_vec();
            let mut dtheta = sens.flat_dtheta().to_vec();
            for (g, pooled) in dtheta.iter_mut().zip(pm.pooled_gradient(&dpsi_total)) {
                *g += pooled;
            }
            gradient[block.top.clone()].copy_from_slice(&pm.top_level_gradient(&dtheta));
        }
        Ok((score, gradient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Observations, ResidualErrorModel};
    use crate::likelihood::LogLikelihood;
    use crate::population::{GaussianModel, HeterogeneousModel, PooledModel};
    use crate::simulator::OneCompartmentModel;

    fn individual(values: Vec<f64>) -> LogLikelihood<OneCompartmentModel> {
        LogLikelihood::new(
            OneCompartmentModel::new(),
            vec![ResidualErrorModel::Constant],
            Observations::single(vec![0.5, 1.0, 2.0], values).unwrap(),
        )
        .unwrap()
    }

    fn population_models() -> Vec<PopulationModel> {
        vec![
            PooledModel::new(1).unwrap().into(),
            GaussianModel::new(1, false).unwrap().into(),
            HeterogeneousModel::new(1, 1).unwrap().into(),
            PooledModel::new(1).unwrap().into(),
        ]
    }

    fn composer() -> HierarchicalLogLikelihood<LogLikelihood<OneCompartmentModel>> {
        HierarchicalLogLikelihood::new(
            vec![
                individual(vec![4.0, 3.1, 1.8]).with_id("a"),
                individual(vec![3.8, 3.0, 1.9]),
            ],
            population_models(),
        )
        .unwrap()
    }

    #[test]
    fn layout_follows_population_models() {
        let log_likelihood = composer();
        // pooled: 1, Gaussian: 2 + 2, heterogeneous: 2, pooled: 1
        assert_eq!(log_likelihood.n_parameters(false), 8);
        assert_eq!(log_likelihood.n_parameters(true), 4);
        assert_eq!(
            log_likelihood.top_level_mask(),
            vec![true, false, false, true, true, false, false, true]
        );
        assert_eq!(
            log_likelihood.get_parameter_names(false, true),
            vec![
                "Pooled central.drug_amount",
                "a central.elimination_rate",
                "automatic-id-2 central.elimination_rate",
                "Mean central.elimination_rate",
                "Std. central.elimination_rate",
                "a central.size",
                "automatic-id-2 central.size",
                "Pooled central.drug_concentration Sigma base",
            ]
        );
        assert_eq!(
            log_likelihood.get_parameter_names(true, false),
            vec![
                "Pooled central.drug_amount",
                "Mean central.elimination_rate",
                "Std. central.elimination_rate",
                "Pooled central.drug_concentration Sigma base",
            ]
        );
        let ids = log_likelihood.get_id();
        assert_eq!(ids[0], None);
        assert_eq!(ids[1].as_deref(), Some("a"));
        assert_eq!(ids[6].as_deref(), Some("automatic-id-2"));
    }

    #[test]
    fn individual_parameters_are_assembled() {
        let log_likelihood = composer();
        let parameters = [10.0, 0.5, -1.0, 0.6, 0.2, 2.0, 2.2, 0.3];
        let psi = log_likelihood.compute_individual_parameters(&parameters).unwrap();
        assert_eq!(psi.row(0).to_vec(), vec![10.0, 0.6 + 0.2 * 0.5, 2.0, 0.3]);
        assert_eq!(psi.row(1).to_vec(), vec![10.0, 0.6 - 0.2, 2.2, 0.3]);
    }

    #[test]
    fn mismatched_likelihoods_are_rejected() {
        let short = LogLikelihood::new(
            OneCompartmentModel::new(),
            vec![ResidualErrorModel::Combined],
            Observations::single(vec![1.0], vec![1.0]).unwrap(),
        )
        .unwrap();
        let result = HierarchicalLogLikelihood::new(
            vec![individual(vec![1.0, 1.0, 1.0]), short],
            population_models(),
        );
        assert!(matches!(result, Err(PopulationError::LikelihoodMismatch(_))));
    }

    #[test]
    fn population_models_must_cover_all_parameters() {
        let result = HierarchicalLogLikelihood::new(
            vec![individual(vec![1.0, 1.0, 1.0])],
            vec![PooledModel::new(3).unwrap().into()],
        );
        assert!(matches!(
            result,
            Err(PopulationError::PopulationModelCount {
                expected: 4,
                found: 3
            })
        ));
        let empty: Vec<LogLikelihood<OneCompartmentModel>> = Vec::new();
        assert!(HierarchicalLogLikelihood::new(empty, population_models()).is_err());
    }

    #[test]
    fn rejected_population_gives_zero_gradient() {
        let log_likelihood = HierarchicalLogLikelihood::new(
            vec![individual(vec![4.0, 3.1, 1.8])],
            vec![
                PooledModel::new(1).unwrap().into(),
                GaussianModel::new(1, true).unwrap().into(),
                PooledModel::new(2).unwrap().into(),
            ],
        )
        .unwrap();
        let parameters = [10.0, 0.5, 0.5, -1.0, 2.0, 0.3];
        let (score, gradient) = log_likelihood.evaluate_s1(&parameters).unwrap();
        assert_eq!(score, f64::NEG_INFINITY);
        assert_eq!(gradient, vec![0.0; 6]);
        assert_eq!(log_likelihood.evaluate(&parameters).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn covariates_are_validated() {
        assert!(composer().with_covariates(Array2::zeros((2, 1))).is_err());
        assert!(composer().with_covariates(Array2::zeros((3, 0))).is_err());
        assert!(composer().with_covariates(Array2::zeros((2, 0))).is_ok());
    }
}
