//! Population models.
//!
//! A population model describes how a structural parameter varies across
//! individuals. It maps population-level parameters θ and individual latent
//! values η to individual parameters ψ, and scores η (or ψ) under the
//! population distribution.
//!
//! The set of models is closed: [`PopulationModel`] is an enum over the
//! supported variants, and composition (composed, covariate and reduced
//! models) is expressed through nesting.
//!
//! # Layout
//!
//! - θ is a flat slice of length [`PopulationModel::n_parameters`]. For models
//!   with several parameters per dimension it is parameter-major, e.g.
//!   `[μ_1, μ_2, σ_1, σ_2]` for a two-dimensional Gaussian model.
//! - ψ and η are `(n_ids, n_dim)` matrices.

use std::ops::Range;

use ndarray::{aview1, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::PopulationError;

pub mod composed;
pub mod covariate;
pub mod gaussian;
pub mod heterogeneous;
pub mod labels;
pub mod lognormal;
pub mod pooled;
pub mod reduced;
pub mod truncated;

pub use composed::ComposedPopulationModel;
pub use covariate::{CovariatePopulationModel, LinearCovariateModel};
pub use gaussian::GaussianModel;
pub use heterogeneous::HeterogeneousModel;
pub use lognormal::LogNormalModel;
pub use pooled::PooledModel;
pub use reduced::ReducedPopulationModel;
pub use truncated::TruncatedGaussianModel;

/// Shape of the population-parameter gradient returned by
/// [`PopulationModel::compute_sensitivities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientLayout {
    /// One row, summed over individuals.
    #[default]
    Flattened,
    /// One row per individual, holding each individual's contribution.
    PerIndividual,
}

/// Log-likelihood of a population model and its gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensitivities {
    pub score: f64,
    /// Gradient with respect to the individual values, `(n_ids, n_dim)`.
    pub dpsi: Array2<f64>,
    /// Gradient with respect to θ, `(1, n_parameters)` or `(n_ids, n_parameters)`.
    pub dtheta: Array2<f64>,
}

impl Sensitivities {
    /// Gradient with respect to θ summed over individuals.
    pub fn flat_dtheta(&self) -> Array1<f64> {
        self.dtheta.sum_axis(Axis(0))
    }

    /// Out-of-support evaluation: `-inf` score and infinite gradients.
    pub(crate) fn rejected(n_ids: usize, n_dim: usize, rows: usize, n_parameters: usize) -> Self {
        Self {
            score: f64::NEG_INFINITY,
            dpsi: Array2::from_elem((n_ids, n_dim), f64::INFINITY),
            dtheta: Array2::from_elem((rows, n_parameters), f64::INFINITY),
        }
    }

    pub(crate) fn with_layout(mut self, layout: GradientLayout) -> Self {
        if layout == GradientLayout::Flattened && self.dtheta.nrows() != 1 {
            self.dtheta = self.dtheta.sum_axis(Axis(0)).insert_axis(Axis(0));
        }
        self
    }
}

/// Row-wise evaluation of the location-scale families.
///
/// θ is given as a matrix with either one row shared by all individuals or
/// one row per individual, which lets covariate models shift the location of
/// each individual. Shapes are validated by the caller.
pub(crate) trait LocationScale {
    fn pointwise_rows(&self, theta: ArrayView2<f64>, psi: ArrayView2<f64>) -> Array1<f64>;

    /// Returns the gradient with respect to θ per individual.
    fn sensitivities_rows(
        &self,
        theta: ArrayView2<f64>,
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
    ) -> Sensitivities;

    fn individual_parameters_rows(&self, theta: ArrayView2<f64>, eta: ArrayView2<f64>) -> Array2<f64>;

    fn sample_rows(
        &self,
        theta: ArrayView2<f64>,
        n_samples: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f64>, PopulationError>;
}

pub(crate) fn theta_row(theta: ArrayView2<'_, f64>, i: usize) -> ArrayView1<'_, f64> {
    let row = if theta.nrows() == 1 { 0 } else { i };
    theta.index_axis_move(Axis(0), row)
}

pub(crate) fn has_non_positive(theta: ArrayView2<f64>, columns: Range<usize>) -> bool {
    theta
        .outer_iter()
        .any(|row| columns.clone().any(|column| !(row[column] > 0.0)))
}

fn single_row(theta: &[f64]) -> ArrayView2<'_, f64> {
    aview1(theta).insert_axis(Axis(0))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PopulationModel {
    Pooled(PooledModel),
    Heterogeneous(HeterogeneousModel),
    Gaussian(GaussianModel),
    LogNormal(LogNormalModel),
    TruncatedGaussian(TruncatedGaussianModel),
    Composed(ComposedPopulationModel),
    Covariate(CovariatePopulationModel),
    Reduced(ReducedPopulationModel),
}

macro_rules! impl_from_variant {
    ($($variant:ident($model:ty)),* $(,)?) => {
        $(
            impl From<$model> for PopulationModel {
                fn from(model: $model) -> Self {
                    PopulationModel::$variant(model)
                }
            }
        )*
    };
}

impl_from_variant!(
    Pooled(PooledModel),
    Heterogeneous(HeterogeneousModel),
    Gaussian(GaussianModel),
    LogNormal(LogNormalModel),
    TruncatedGaussian(TruncatedGaussianModel),
    Composed(ComposedPopulationModel),
    Covariate(CovariatePopulationModel),
    Reduced(ReducedPopulationModel),
);

impl PopulationModel {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PopulationModel::Pooled(_) => "pooled",
            PopulationModel::Heterogeneous(_) => "heterogeneous",
            PopulationModel::Gaussian(_) => "Gaussian",
            PopulationModel::LogNormal(_) => "log-normal",
            PopulationModel::TruncatedGaussian(_) => "truncated Gaussian",
            PopulationModel::Composed(_) => "composed",
            PopulationModel::Covariate(_) => "covariate",
            PopulationModel::Reduced(_) => "reduced",
        }
    }

    pub fn n_dim(&self) -> usize {
        match self {
            PopulationModel::Pooled(model) => model.labels().n_dim(),
            PopulationModel::Heterogeneous(model) => model.labels().n_dim(),
            PopulationModel::Gaussian(model) => model.labels().n_dim(),
            PopulationModel::LogNormal(model) => model.labels().n_dim(),
            PopulationModel::TruncatedGaussian(model) => model.labels().n_dim(),
            PopulationModel::Composed(model) => {
                model.population_models().iter().map(|m| m.n_dim()).sum()
            }
            PopulationModel::Covariate(model) => model.labels().n_dim(),
            PopulationModel::Reduced(model) => model.population_model().n_dim(),
        }
    }

    pub fn n_parameters(&self) -> usize {
        match self {
            PopulationModel::Pooled(_) => self.n_dim(),
            PopulationModel::Heterogeneous(model) => model.n_parameters(),
            PopulationModel::Gaussian(_)
            | PopulationModel::LogNormal(_)
            | PopulationModel::TruncatedGaussian(_) => 2 * self.n_dim(),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .map(|m| m.n_parameters())
                .sum(),
            PopulationModel::Covariate(model) => model.n_parameters(),
            PopulationModel::Reduced(model) => model.n_parameters(),
        }
    }

    /// Number of bottom-level (individual) and top-level (population)
    /// parameters of a hierarchical model with `n_ids` individuals.
    pub fn n_hierarchical_parameters(&self, n_ids: usize) -> (usize, usize) {
        match self {
            PopulationModel::Pooled(_) => (0, self.n_dim()),
            PopulationModel::Heterogeneous(_) => (n_ids * self.n_dim(), 0),
            PopulationModel::Gaussian(_)
            | PopulationModel::LogNormal(_)
            | PopulationModel::TruncatedGaussian(_)
            | PopulationModel::Covariate(_) => (n_ids * self.n_dim(), self.n_parameters()),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .map(|m| m.n_hierarchical_parameters(n_ids))
                .fold((0, 0), |(b, t), (cb, ct)| (b + cb, t + ct)),
            PopulationModel::Reduced(model) => {
                let (bottom, top) = model.population_model().n_hierarchical_parameters(n_ids);
                (bottom, top - model.n_fixed_parameters())
            }
        }
    }

    pub fn get_dim_names(&self) -> Vec<String> {
        match self {
            PopulationModel::Pooled(model) => model.labels().dim_names(),
            PopulationModel::Heterogeneous(model) => model.labels().dim_names(),
            PopulationModel::Gaussian(model) => model.labels().dim_names(),
            PopulationModel::LogNormal(model) => model.labels().dim_names(),
            PopulationModel::TruncatedGaussian(model) => model.labels().dim_names(),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .flat_map(|m| m.get_dim_names())
                .collect(),
            PopulationModel::Covariate(model) => model.labels().dim_names(),
            PopulationModel::Reduced(model) => model.population_model().get_dim_names(),
        }
    }

    /// Sets the dimension names. `None` restores the defaults `Dim. k`.
    pub fn set_dim_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        match self {
            PopulationModel::Pooled(model) => model.labels_mut().set_dim_names(names),
            PopulationModel::Heterogeneous(model) => model.labels_mut().set_dim_names(names),
            PopulationModel::Gaussian(model) => model.labels_mut().set_dim_names(names),
            PopulationModel::LogNormal(model) => model.labels_mut().set_dim_names(names),
            PopulationModel::TruncatedGaussian(model) => model.labels_mut().set_dim_names(names),
            PopulationModel::Composed(model) => {
                let ranges = model.dim_ranges();
                let total = ranges.last().map_or(0, |range| range.end);
                model.set_names_by_child(names, ranges, total, PopulationModel::set_dim_names)
            }
            PopulationModel::Covariate(model) => model.set_dim_names(names),
            PopulationModel::Reduced(model) => model.model_mut().set_dim_names(names),
        }
    }

    /// Parameter names, suffixed by the dimension name unless `exclude_dim_names`.
    pub fn get_parameter_names(&self, exclude_dim_names: bool) -> Vec<String> {
        match self {
            PopulationModel::Pooled(model) => model
                .labels()
                .parameter_names(model.default_names(), exclude_dim_names),
            PopulationModel::Heterogeneous(model) => model
                .labels()
                .parameter_names(model.default_names(), exclude_dim_names),
            PopulationModel::Gaussian(model) => model
                .labels()
                .parameter_names(model.default_names(), exclude_dim_names),
            PopulationModel::LogNormal(model) => model
                .labels()
                .parameter_names(model.default_names(), exclude_dim_names),
            PopulationModel::TruncatedGaussian(model) => model
                .labels()
                .parameter_names(model.default_names(), exclude_dim_names),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .flat_map(|m| m.get_parameter_names(exclude_dim_names))
                .collect(),
            PopulationModel::Covariate(model) => model
                .labels()
                .parameter_names(model.default_names(), exclude_dim_names),
            PopulationModel::Reduced(model) => model.parameter_names(exclude_dim_names),
        }
    }

    /// Sets the parameter names (without dimension suffix). `None` restores the defaults.
    pub fn set_parameter_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        let n_parameters = self.n_parameters();
        match self {
            PopulationModel::Pooled(model) => model.labels_mut().set_parameter_names(names, n_parameters),
            PopulationModel::Heterogeneous(model) => {
                model.labels_mut().set_parameter_names(names, n_parameters)
            }
            PopulationModel::Gaussian(model) => model.labels_mut().set_parameter_names(names, n_parameters),
            PopulationModel::LogNormal(model) => model.labels_mut().set_parameter_names(names, n_parameters),
            PopulationModel::TruncatedGaussian(model) => {
                model.labels_mut().set_parameter_names(names, n_parameters)
            }
            PopulationModel::Composed(model) => {
                let ranges = model.parameter_ranges();
                model.set_names_by_child(names, ranges, n_parameters, PopulationModel::set_parameter_names)
            }
            PopulationModel::Covariate(model) => model.set_parameter_names(names),
            PopulationModel::Reduced(model) => model.set_parameter_names(names),
        }
    }

    /// Binds the model to `n_ids` individuals.
    ///
    /// Only heterogeneous models change; they regenerate their default names.
    pub fn set_n_ids(&mut self, n_ids: usize) -> Result<(), PopulationError> {
        match self {
            PopulationModel::Heterogeneous(model) => model.set_n_ids(n_ids),
            PopulationModel::Composed(model) => model
                .models_mut()
                .iter_mut()
                .try_for_each(|m| m.set_n_ids(n_ids)),
            PopulationModel::Reduced(model) => model.model_mut().set_n_ids(n_ids),
            _ => Ok(()),
        }
    }

    pub fn n_covariates(&self) -> usize {
        match self {
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .map(|m| m.n_covariates())
                .sum(),
            PopulationModel::Covariate(model) => model.covariate_model().n_covariates(),
            PopulationModel::Reduced(model) => model.population_model().n_covariates(),
            _ => 0,
        }
    }

    pub fn get_covariate_names(&self) -> Vec<String> {
        match self {
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .flat_map(|m| m.get_covariate_names())
                .collect(),
            PopulationModel::Covariate(model) => model.covariate_model().covariate_names(),
            PopulationModel::Reduced(model) => model.population_model().get_covariate_names(),
            _ => Vec::new(),
        }
    }

    /// Sets the covariate names. `None` restores the defaults `Covariate k`.
    ///
    /// Renaming covariates renames the shift parameters that carry no custom name.
    pub fn set_covariate_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        match self {
            PopulationModel::Composed(model) => {
                let ranges = model.covariate_ranges();
                let total = ranges.last().map_or(0, |range| range.end);
                model.set_names_by_child(names, ranges, total, PopulationModel::set_covariate_names)
            }
            PopulationModel::Covariate(model) => model.covariate_model_mut().set_covariate_names(names),
            PopulationModel::Reduced(model) => model.model_mut().set_covariate_names(names),
            _ => match names {
                Some(names) if !names.is_empty() => Err(PopulationError::NameLength {
                    expected: 0,
                    found: names.len(),
                }),
                _ => Ok(()),
            },
        }
    }

    /// Whether ψ differs from the latent values η.
    pub fn transforms_individual_parameters(&self) -> bool {
        match self {
            PopulationModel::Pooled(_)
            | PopulationModel::Heterogeneous(_)
            | PopulationModel::TruncatedGaussian(_) => false,
            PopulationModel::Gaussian(model) => !model.is_centered(),
            PopulationModel::LogNormal(model) => !model.is_centered(),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .any(|m| m.transforms_individual_parameters()),
            PopulationModel::Covariate(_) => true,
            PopulationModel::Reduced(model) => model.population_model().transforms_individual_parameters(),
        }
    }

    fn check_parameters(&self, theta: &[f64]) -> Result<(), PopulationError> {
        let expected = self.n_parameters();
        if theta.len() != expected {
            return Err(PopulationError::ParameterCount {
                expected,
                found: theta.len(),
            });
        }
        Ok(())
    }

    fn check_individuals(&self, what: &'static str, values: ArrayView2<f64>) -> Result<(), PopulationError> {
        let expected = self.n_dim();
        if values.ncols() != expected {
            return Err(PopulationError::Columns {
                what,
                expected,
                found: values.ncols(),
            });
        }
        Ok(())
    }

    pub(crate) fn location_scale(&self) -> Result<&dyn LocationScale, PopulationError> {
        match self {
            PopulationModel::Gaussian(model) => Ok(model as &dyn LocationScale),
            PopulationModel::LogNormal(model) => Ok(model as &dyn LocationScale),
            PopulationModel::TruncatedGaussian(model) => Ok(model as &dyn LocationScale),
            _ => Err(PopulationError::InvalidModel(format!(
                "a {} population model has no location parameter",
                self.kind()
            ))),
        }
    }

    /// Log-likelihood of the individual values `psi` (or latent values η for
    /// non-centered models) under the population parameters `theta`.
    ///
    /// Parameters outside the support give `-inf`; only malformed shapes are errors.
    pub fn compute_log_likelihood(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<f64, PopulationError> {
        self.check_parameters(theta)?;
        self.check_individuals("individual parameters", psi)?;
        match self {
            PopulationModel::Pooled(model) => Ok(model.pointwise(theta, psi).sum()),
            PopulationModel::Heterogeneous(_) => Ok(0.0),
            PopulationModel::Gaussian(_)
            | PopulationModel::LogNormal(_)
            | PopulationModel::TruncatedGaussian(_) => {
                Ok(self.location_scale()?.pointwise_rows(single_row(theta), psi).sum())
            }
            PopulationModel::Composed(model) => model.log_likelihood(theta, psi, covariates),
            PopulationModel::Covariate(model) => model.log_likelihood(theta, psi, covariates),
            PopulationModel::Reduced(model) => model.log_likelihood(theta, psi, covariates),
        }
    }

    /// Log-likelihood contribution of each individual.
    pub fn compute_pointwise_ll(&self, theta: &[f64], psi: ArrayView2<f64>) -> Result<Array1<f64>, PopulationError> {
        self.check_parameters(theta)?;
        self.check_individuals("individual parameters", psi)?;
        match self {
            PopulationModel::Pooled(model) => Ok(model.pointwise(theta, psi)),
            PopulationModel::Heterogeneous(model) => Ok(model.pointwise(psi)),
            PopulationModel::Gaussian(_)
            | PopulationModel::LogNormal(_)
            | PopulationModel::TruncatedGaussian(_) => {
                Ok(self.location_scale()?.pointwise_rows(single_row(theta), psi))
            }
            PopulationModel::Reduced(model) => model.pointwise(theta, psi),
            PopulationModel::Composed(_) | PopulationModel::Covariate(_) => {
                Err(PopulationError::NotImplemented {
                    capability: "Pointwise log-likelihood",
                    model: self.kind(),
                })
            }
        }
    }

    /// Log-likelihood and its gradients.
    ///
    /// `dlogp_dpsi` is the gradient of a downstream log-likelihood with
    /// respect to ψ. It is chained through ψ(θ, η) so that the returned `dpsi`
    /// (a gradient with respect to the latent values) and `dtheta` hold the
    /// gradient of the joint log-likelihood.
    pub fn compute_sensitivities(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
        covariates: Option<ArrayView2<f64>>,
        layout: GradientLayout,
    ) -> Result<Sensitivities, PopulationError> {
        self.check_parameters(theta)?;
        self.check_individuals("individual parameters", psi)?;
        if let Some(dlogp) = dlogp_dpsi {
            if dlogp.dim() != psi.dim() {
                self.check_individuals("downstream gradient", dlogp)?;
                return Err(PopulationError::Rows {
                    what: "downstream gradient",
                    expected: psi.nrows(),
                    found: dlogp.nrows(),
                });
            }
        }
        let sens = match self {
            PopulationModel::Pooled(model) => model.sensitivities(theta, psi, dlogp_dpsi),
            PopulationModel::Heterogeneous(model) => model.sensitivities(psi, dlogp_dpsi),
            PopulationModel::Gaussian(_)
            | PopulationModel::LogNormal(_)
            | PopulationModel::TruncatedGaussian(_) => {
                self.location_scale()?
                    .sensitivities_rows(single_row(theta), psi, dlogp_dpsi)
            }
            PopulationModel::Composed(model) => {
                return model.sensitivities(theta, psi, dlogp_dpsi, covariates, layout)
            }
            PopulationModel::Covariate(model) => {
                return model.sensitivities(theta, psi, dlogp_dpsi, covariates, layout)
            }
            PopulationModel::Reduced(model) => {
                return model.sensitivities(theta, psi, dlogp_dpsi, covariates, layout)
            }
        };
        Ok(sens.with_layout(layout))
    }

    /// Individual parameters ψ for latent values `eta`.
    pub fn compute_individual_parameters(
        &self,
        theta: &[f64],
        eta: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        self.check_parameters(theta)?;
        self.check_individuals("latent values", eta)?;
        match self {
            PopulationModel::Pooled(model) => Ok(model.individual_parameters(theta, eta.nrows())),
            PopulationModel::Heterogeneous(_) => Ok(eta.to_owned()),
            PopulationModel::Gaussian(_)
            | PopulationModel::LogNormal(_)
            | PopulationModel::TruncatedGaussian(_) => Ok(self
                .location_scale()?
                .individual_parameters_rows(single_row(theta), eta)),
            PopulationModel::Composed(model) => model.individual_parameters(theta, eta, covariates),
            PopulationModel::Covariate(model) => model.individual_parameters(theta, eta, covariates),
            PopulationModel::Reduced(model) => model.individual_parameters(theta, eta, covariates),
        }
    }

    /// Draws `n_samples` individual parameters ψ, shape `(n_samples, n_dim)`.
    pub fn sample(
        &self,
        theta: &[f64],
        n_samples: usize,
        rng: &mut dyn RngCore,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        self.check_parameters(theta)?;
        match self {
            PopulationModel::Pooled(model) => Ok(model.individual_parameters(theta, n_samples)),
            PopulationModel::Heterogeneous(model) => Ok(model.sample(theta, n_samples, rng)),
            PopulationModel::Gaussian(_)
            | PopulationModel::LogNormal(_)
            | PopulationModel::TruncatedGaussian(_) => {
                self.location_scale()?
                    .sample_rows(single_row(theta), n_samples, rng)
            }
            PopulationModel::Composed(model) => model.sample(theta, n_samples, rng, covariates),
            PopulationModel::Covariate(model) => model.sample(theta, n_samples, rng, covariates),
            PopulationModel::Reduced(model) => model.sample(theta, n_samples, rng, covariates),
        }
    }

    /// [`PopulationModel::sample`] with a generator seeded from `seed`.
    pub fn sample_seeded(
        &self,
        theta: &[f64],
        n_samples: usize,
        seed: u64,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.sample(theta, n_samples, &mut rng, covariates)
    }

    /// Mean and standard deviation of ψ per dimension.
    pub fn get_mean_and_std(&self, theta: &[f64]) -> Result<(Array1<f64>, Array1<f64>), PopulationError> {
        self.check_parameters(theta)?;
        match self {
            PopulationModel::Gaussian(model) => model.mean_and_std(theta),
            PopulationModel::LogNormal(model) => model.mean_and_std(theta),
            PopulationModel::TruncatedGaussian(model) => model.mean_and_std(theta),
            PopulationModel::Reduced(model) => model.mean_and_std(theta),
            _ => Err(PopulationError::NotImplemented {
                capability: "Mean and standard deviation",
                model: self.kind(),
            }),
        }
    }

    /// Removes reduced wrappers that fix no parameters.
    pub fn simplify(self) -> PopulationModel {
        match self {
            PopulationModel::Reduced(model) if model.n_fixed_parameters() == 0 => {
                model.into_inner().simplify()
            }
            other => other,
        }
    }

    pub fn to_json(&self) -> Result<String, PopulationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PopulationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// `n_ids` of every heterogeneous model contained in this model.
    pub(crate) fn heterogeneous_n_ids(&self) -> Vec<usize> {
        match self {
            PopulationModel::Heterogeneous(model) => vec![model.n_ids()],
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .flat_map(|m| m.heterogeneous_n_ids())
                .collect(),
            PopulationModel::Reduced(model) => model.population_model().heterogeneous_n_ids(),
            _ => Vec::new(),
        }
    }

    /// Per dimension, whether the dimension has bottom-level values in a
    /// hierarchical model.
    pub(crate) fn bottom_dims(&self) -> Vec<bool> {
        match self {
            PopulationModel::Pooled(_) => vec![false; self.n_dim()],
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .flat_map(|m| m.bottom_dims())
                .collect(),
            PopulationModel::Reduced(model) => model.population_model().bottom_dims(),
            _ => vec![true; self.n_dim()],
        }
    }

    /// Assembles θ from the top-level block of a hierarchical parameter
    /// vector. Heterogeneous models take their parameters from the latent values.
    pub(crate) fn expand_top_level(&self, top: &[f64], eta: ArrayView2<f64>) -> Vec<f64> {
        match self {
            PopulationModel::Heterogeneous(_) => eta.iter().copied().collect(),
            PopulationModel::Composed(model) => {
                let n_ids = eta.nrows();
                model
                    .population_models()
                    .iter()
                    .zip(model.top_level_ranges(n_ids))
                    .zip(model.dim_ranges())
                    .flat_map(|((m, tops), dims)| {
                        m.expand_top_level(&top[tops], eta.slice(ndarray::s![.., dims]))
                    })
                    .collect()
            }
            _ => top.to_vec(),
        }
    }

    /// Restricts a flat θ gradient to the top-level parameters.
    pub(crate) fn top_level_gradient(&self, dtheta: &[f64]) -> Vec<f64> {
        match self {
            PopulationModel::Heterogeneous(_) => Vec::new(),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .zip(model.parameter_ranges())
                .flat_map(|(m, params)| m.top_level_gradient(&dtheta[params]))
                .collect(),
            _ => dtheta.to_vec(),
        }
    }

    /// Gradient with respect to θ carried by the pooled dimensions, given the
    /// ψ gradient of each dimension summed over individuals.
    pub(crate) fn pooled_gradient(&self, dpsi_total: &[f64]) -> Vec<f64> {
        match self {
            PopulationModel::Pooled(_) => dpsi_total.to_vec(),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .zip(model.dim_ranges())
                .flat_map(|(m, dims)| m.pooled_gradient(&dpsi_total[dims]))
                .collect(),
            PopulationModel::Reduced(model) => model.project_gradient(
                &model.population_model().pooled_gradient(dpsi_total),
            ),
            _ => vec![0.0; self.n_parameters()],
        }
    }

    pub(crate) fn top_level_names(&self) -> Vec<String> {
        match self {
            PopulationModel::Heterogeneous(_) => Vec::new(),
            PopulationModel::Composed(model) => model
                .population_models()
                .iter()
                .flat_map(|m| m.top_level_names())
                .collect(),
            _ => self.get_parameter_names(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn composed() -> PopulationModel {
        ComposedPopulationModel::new(vec![
            GaussianModel::new(1, true).unwrap().into(),
            LogNormalModel::new(1, false).unwrap().into(),
            HeterogeneousModel::new(1, 2).unwrap().into(),
        ])
        .unwrap()
        .into()
    }

    #[test]
    fn pooled_reference_values() {
        let model: PopulationModel = PooledModel::new(1).unwrap().into();
        let psi = array![[1.0], [1.0], [1.0], [1.0]];
        assert_eq!(model.compute_log_likelihood(&[1.0], psi.view(), None).unwrap(), 0.0);
        let psi = array![[0.0], [1.0], [1.0], [1.0]];
        assert_eq!(
            model.compute_log_likelihood(&[1.0], psi.view(), None).unwrap(),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn wrong_shapes_are_errors() {
        let model: PopulationModel = GaussianModel::new(1, true).unwrap().into();
        let psi = array![[1.0], [2.0]];
        assert!(matches!(
            model.compute_log_likelihood(&[1.0], psi.view(), None),
            Err(PopulationError::ParameterCount { expected: 2, found: 1 })
        ));
        let psi = array![[1.0, 2.0]];
        assert!(matches!(
            model.compute_log_likelihood(&[1.0, 1.0], psi.view(), None),
            Err(PopulationError::Columns { expected: 1, found: 2, .. })
        ));
    }

    #[test]
    fn composed_log_likelihood_is_sum_of_children() {
        let model = composed();
        assert_eq!(model.n_dim(), 3);
        assert_eq!(model.n_parameters(), 6);
        assert_eq!(model.n_hierarchical_parameters(2), (6, 4));

        let theta = [0.5, 1.5, -0.2, 0.7, 3.0, 4.0];
        let psi = array![[0.1, 0.3, 3.0], [1.2, -0.5, 4.0]];
        let score = model.compute_log_likelihood(&theta, psi.view(), None).unwrap();

        let PopulationModel::Composed(composed) = &model else {
            unreachable!()
        };
        let children = composed.population_models();
        let expected = children[0]
            .compute_log_likelihood(&theta[..2], psi.slice(ndarray::s![.., 0..1]), None)
            .unwrap()
            + children[1]
                .compute_log_likelihood(&theta[2..4], psi.slice(ndarray::s![.., 1..2]), None)
                .unwrap()
            + children[2]
                .compute_log_likelihood(&theta[4..], psi.slice(ndarray::s![.., 2..3]), None)
                .unwrap();
        assert_relative_eq!(score, expected, epsilon = 1e-12);
    }

    #[test]
    fn composed_names_and_dims() {
        let mut model = composed();
        assert_eq!(
            model.get_parameter_names(false),
            vec![
                "Mean Dim. 1",
                "Std. Dim. 1",
                "Log mean Dim. 1",
                "Log std. Dim. 1",
                "ID 1 Dim. 1",
                "ID 2 Dim. 1"
            ]
        );
        model
            .set_dim_names(Some(vec!["a".into(), "b".into(), "c".into()]))
            .unwrap();
        assert_eq!(model.get_parameter_names(false)[2], "Log mean b");
        model.set_dim_names(None).unwrap();
        assert_eq!(model.get_dim_names(), vec!["Dim. 1", "Dim. 1", "Dim. 1"]);

        let names: Vec<String> = (0..6).map(|k| format!("p{}", k)).collect();
        model.set_parameter_names(Some(names.clone())).unwrap();
        assert_eq!(model.get_parameter_names(true), names);
        model.set_parameter_names(None).unwrap();
        assert_eq!(model.get_parameter_names(true)[0], "Mean");
        assert!(model.set_parameter_names(Some(vec!["x".into()])).is_err());
    }

    #[test]
    fn set_n_ids_resizes_heterogeneous_children() {
        let mut model = composed();
        model.set_n_ids(5).unwrap();
        assert_eq!(model.n_parameters(), 4 + 5);
        assert_eq!(model.get_parameter_names(false).len(), 9);
        assert_eq!(model.n_hierarchical_parameters(5), (15, 4));
    }

    #[test]
    fn pointwise_capabilities() {
        let model: PopulationModel = GaussianModel::new(1, true).unwrap().into();
        let psi = array![[0.1], [0.2]];
        let pointwise = model.compute_pointwise_ll(&[0.0, 1.0], psi.view()).unwrap();
        let total = model.compute_log_likelihood(&[0.0, 1.0], psi.view(), None).unwrap();
        assert_relative_eq!(pointwise.sum(), total, epsilon = 1e-12);

        let theta = [0.5, 1.5, -0.2, 0.7, 3.0, 4.0];
        let psi = array![[0.1, 0.3, 3.0]];
        assert!(matches!(
            composed().compute_pointwise_ll(&theta, psi.view()),
            Err(PopulationError::NotImplemented { .. })
        ));
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let model = composed();
        let theta = [0.5, 1.5, -0.2, 0.7, 3.0, 4.0];
        let first = model.sample_seeded(&theta, 10, 42, None).unwrap();
        let second = model.sample_seeded(&theta, 10, 42, None).unwrap();
        assert_eq!(first.dim(), (10, 3));
        assert_eq!(first, second);

        let gaussian: PopulationModel = GaussianModel::new(1, true).unwrap().into();
        assert!(matches!(
            gaussian.sample_seeded(&[0.0, -1.0], 1, 42, None),
            Err(PopulationError::InvalidDistribution { .. })
        ));
        assert!(matches!(
            gaussian.sample_seeded(&[0.0], 1, 42, None),
            Err(PopulationError::ParameterCount { .. })
        ));
    }

    #[test]
    fn json_round_trip_keeps_configuration() {
        let mut reduced = ReducedPopulationModel::new(
            CovariatePopulationModel::new(
                LogNormalModel::new(1, false).unwrap().into(),
                LinearCovariateModel::new(1),
            )
            .unwrap()
            .into(),
        )
        .unwrap();
        reduced
            .fix_parameters([("Shift Covariate 1 Dim. 1", Some(0.5))])
            .unwrap();
        let model: PopulationModel = reduced.into();

        let restored = PopulationModel::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(restored, model);
        assert_eq!(restored.n_parameters(), 2);
    }

    #[test]
    fn simplify_unwraps_reduced_models_without_fixed_parameters() {
        let gaussian: PopulationModel = GaussianModel::new(1, true).unwrap().into();
        let mut reduced = ReducedPopulationModel::new(gaussian.clone()).unwrap();
        reduced.fix_parameters([("Mean Dim. 1", Some(1.0))]).unwrap();
        reduced.fix_parameters([("Mean Dim. 1", None)]).unwrap();
        assert_eq!(PopulationModel::from(reduced).simplify(), gaussian);
    }

    #[test]
    fn covariate_names_are_partitioned_across_children() {
        let with_covariates = |base: PopulationModel, n_covariates| -> PopulationModel {
            CovariatePopulationModel::new(base, LinearCovariateModel::new(n_covariates))
                .unwrap()
                .into()
        };
        let mut model: PopulationModel = ComposedPopulationModel::new(vec![
            with_covariates(GaussianModel::new(1, true).unwrap().into(), 2),
            GaussianModel::new(1, false).unwrap().into(),
            with_covariates(LogNormalModel::new(1, false).unwrap().into(), 1),
        ])
        .unwrap()
        .into();
        assert_eq!(model.n_covariates(), 3);
        assert_eq!(
            model.get_covariate_names(),
            vec!["Covariate 1", "Covariate 2", "Covariate 1"]
        );

        model
            .set_covariate_names(Some(vec!["age".into(), "weight".into(), "dose".into()]))
            .unwrap();
        assert_eq!(model.get_covariate_names(), vec!["age", "weight", "dose"]);
        let names = model.get_parameter_names(false);
        assert_eq!(names[2], "Shift age Dim. 1");
        assert_eq!(names[3], "Shift weight Dim. 1");
        assert_eq!(names[8], "Shift dose Dim. 1");

        assert!(matches!(
            model.set_covariate_names(Some(vec!["age".into()])),
            Err(PopulationError::NameLength { expected: 3, found: 1 })
        ));
        model.set_covariate_names(None).unwrap();
        assert_eq!(model.get_parameter_names(true)[8], "Shift Covariate 1");
    }

    #[test]
    fn models_without_covariates_accept_no_covariate_names() {
        let mut model: PopulationModel = GaussianModel::new(1, true).unwrap().into();
        assert_eq!(model.n_covariates(), 0);
        assert!(model.get_covariate_names().is_empty());
        model.set_covariate_names(None).unwrap();
        model.set_covariate_names(Some(Vec::new())).unwrap();
        assert!(matches!(
            model.set_covariate_names(Some(vec!["age".into()])),
            Err(PopulationError::NameLength { expected: 0, found: 1 })
        ));
    }

    #[test]
    fn transforms_flag_follows_parametrisation() {
        let model = |m: PopulationModel| m.transforms_individual_parameters();
        assert!(!model(GaussianModel::new(1, true).unwrap().into()));
        assert!(model(GaussianModel::new(1, false).unwrap().into()));
        assert!(!model(LogNormalModel::new(1, true).unwrap().into()));
        assert!(model(LogNormalModel::new(1, false).unwrap().into()));
        assert!(!model(PooledModel::new(1).unwrap().into()));
        assert!(!model(HeterogeneousModel::new(1, 2).unwrap().into()));
        assert!(!model(TruncatedGaussianModel::new(1).unwrap().into()));
        assert!(model(
            CovariatePopulationModel::new(
                GaussianModel::new(1, true).unwrap().into(),
                LinearCovariateModel::new(1),
            )
            .unwrap()
            .into()
        ));

        let centered_only = ComposedPopulationModel::new(vec![
            GaussianModel::new(1, true).unwrap().into(),
            TruncatedGaussianModel::new(1).unwrap().into(),
        ])
        .unwrap();
        assert!(!model(centered_only.into()));
        let mixed = ComposedPopulationModel::new(vec![
            GaussianModel::new(1, true).unwrap().into(),
            LogNormalModel::new(1, false).unwrap().into(),
        ])
        .unwrap();
        assert!(model(mixed.into()));
    }

    #[test]
    fn means_and_stds() {
        let gaussian: PopulationModel = GaussianModel::new(2, true).unwrap().into();
        let (mean, std) = gaussian.get_mean_and_std(&[1.0, 2.0, 0.5, 0.25]).unwrap();
        assert_eq!(mean, array![1.0, 2.0]);
        assert_eq!(std, array![0.5, 0.25]);

        let pooled: PopulationModel = PooledModel::new(1).unwrap().into();
        assert!(matches!(
            pooled.get_mean_and_std(&[1.0]),
            Err(PopulationError::NotImplemented { .. })
        ));
    }
}
