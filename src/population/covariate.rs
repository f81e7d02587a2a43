use ndarray::{s, Array2, ArrayView2};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::labels::Labels;
use super::{GradientLayout, PopulationModel, Sensitivities};
use crate::error::PopulationError;

/// Linear shift of a location parameter by individual covariates.
///
/// For individual `i` with covariates `c_i`, the location becomes
/// `μ_i = μ + Σ_k β_k c_ik`. For a log-normal base model this is a
/// log-linear model of ψ.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearCovariateModel {
    covariate_names: Vec<String>,
}

fn default_covariate_names(n_covariates: usize) -> Vec<String> {
    (1..=n_covariates).map(|k| format!("Covariate {}", k)).collect()
}

impl LinearCovariateModel {
    pub fn new(n_covariates: usize) -> Self {
        Self {
            covariate_names: default_covariate_names(n_covariates),
        }
    }

    pub fn n_covariates(&self) -> usize {
        self.covariate_names.len()
    }

    pub fn covariate_names(&self) -> Vec<String> {
        self.covariate_names.clone()
    }

    pub fn set_covariate_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        match names {
            None => self.covariate_names = default_covariate_names(self.n_covariates()),
            Some(names) => {
                if names.len() != self.n_covariates() {
                    return Err(PopulationError::NameLength {
                        expected: self.n_covariates(),
                        found: names.len(),
                    });
                }
                self.covariate_names = names;
            }
        }
        Ok(())
    }

    /// Per-individual base parameters, one row per covariate row.
    ///
    /// Without covariates a single broadcast row is returned.
    pub fn shift_location(
        &self,
        base: &[f64],
        shifts: &[f64],
        covariates: Option<ArrayView2<f64>>,
    ) -> Array2<f64> {
        let covariates = match covariates {
            Some(covariates) if self.n_covariates() > 0 => covariates,
            _ => return Array2::from_shape_fn((1, base.len()), |(_, j)| base[j]),
        };
        let mut rows = Array2::from_shape_fn((covariates.nrows(), base.len()), |(_, j)| base[j]);
        for (mut row, values) in rows.outer_iter_mut().zip(covariates.outer_iter()) {
            row[0] += shifts
                .iter()
                .zip(values.iter())
                .map(|(beta, c)| beta * c)
                .sum::<f64>();
        }
        rows
    }
}

/// A one-dimensional location-scale population model whose location depends
/// on individual covariates.
///
/// Parameters are the base model's parameters followed by one shift per
/// covariate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CovariatePopulationModel {
    base: Box<PopulationModel>,
    covariate_model: LinearCovariateModel,
    labels: Labels,
}

impl CovariatePopulationModel {
    pub fn new(
        base: PopulationModel,
        covariate_model: LinearCovariateModel,
    ) -> Result<Self, PopulationError> {
        if base.n_dim() != 1 {
            return Err(PopulationError::InvalidModel(
                "Only 1-dimensional population models can be the base of a covariate population model"
                    .to_string(),
            ));
        }
        base.location_scale()?;
        let labels = Labels::new(1)?;
        let mut model = Self {
            base: Box::new(base),
            covariate_model,
            labels,
        };
        let dim_names = model.base.get_dim_names();
        model.labels.set_dim_names(Some(dim_names))?;
        Ok(model)
    }

    pub fn population_model(&self) -> &PopulationModel {
        &self.base
    }

    pub fn covariate_model(&self) -> &LinearCovariateModel {
        &self.covariate_model
    }

    pub(crate) fn covariate_model_mut(&mut self) -> &mut LinearCovariateModel {
        &mut self.covariate_model
    }

    pub(crate) fn labels(&self) -> &Labels {
        &self.labels
    }

    pub(crate) fn set_dim_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        self.base.set_dim_names(names.clone())?;
        self.labels.set_dim_names(names)
    }

    pub(crate) fn set_parameter_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        let n_parameters = self.n_parameters();
        self.labels.set_parameter_names(names, n_parameters)
    }

    pub(crate) fn n_parameters(&self) -> usize {
        self.base.n_parameters() + self.covariate_model.n_covariates()
    }

    pub(crate) fn default_names(&self) -> Vec<(String, usize)> {
        let mut names: Vec<(String, usize)> = self
            .base
            .get_parameter_names(true)
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                if index == 0 {
                    (format!("Base {}", lowercase_first(&name)), 0)
                } else {
                    (name, 0)
                }
            })
            .collect();
        names.extend(
            self.covariate_model
                .covariate_names()
                .into_iter()
                .map(|name| (format!("Shift {}", name), 0)),
        );
        names
    }

    fn individual_theta(
        &self,
        theta: &[f64],
        covariates: Option<ArrayView2<f64>>,
        n_rows: usize,
    ) -> Result<Array2<f64>, PopulationError> {
        let n_covariates = self.covariate_model.n_covariates();
        let (base, shifts) = theta.split_at(self.base.n_parameters());
        if n_covariates > 0 {
            let covariates = covariates.ok_or(PopulationError::MissingCovariates(n_covariates))?;
            if covariates.ncols() != n_covariates {
                return Err(PopulationError::Covariates {
                    expected: n_covariates,
                    found: covariates.ncols(),
                });
            }
            if covariates.nrows() != n_rows && covariates.nrows() != 1 {
                return Err(PopulationError::Rows {
                    what: "covariates",
                    expected: n_rows,
                    found: covariates.nrows(),
                });
            }
        }
        Ok(self.covariate_model.shift_location(base, shifts, covariates))
    }

    pub(crate) fn log_likelihood(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<f64, PopulationError> {
        let rows = self.individual_theta(theta, covariates, psi.nrows())?;
        Ok(self.base.location_scale()?.pointwise_rows(rows.view(), psi).sum())
    }

    pub(crate) fn sensitivities(
        &self,
        theta: &[f64],
        psi: ArrayView2<f64>,
        dlogp_dpsi: Option<ArrayView2<f64>>,
        covariates: Option<ArrayView2<f64>>,
        layout: GradientLayout,
    ) -> Result<Sensitivities, PopulationError> {
        let n_ids = psi.nrows();
        let rows = self.individual_theta(theta, covariates, n_ids)?;
        let base = self.base.location_scale()?;
        let n_base = self.base.n_parameters();
        let n_covariates = self.covariate_model.n_covariates();

        let base_sens = base.sensitivities_rows(rows.view(), psi, dlogp_dpsi);
        let mut dtheta = Array2::zeros((n_ids, n_base + n_covariates));
        dtheta.slice_mut(s![.., ..n_base]).assign(&base_sens.dtheta);
        if let Some(covariates) = covariates.filter(|_| n_covariates > 0) {
            // ∂μ_i/∂β_k = c_ik
            for i in 0..n_ids {
                let values = covariates.row(if covariates.nrows() == 1 { 0 } else { i });
                let dlocation = base_sens.dtheta[[i, 0]];
                for k in 0..n_covariates {
                    dtheta[[i, n_base + k]] = dlocation * values[k];
                }
            }
        }
        Ok(Sensitivities {
            score: base_sens.score,
            dpsi: base_sens.dpsi,
            dtheta,
        }
        .with_layout(layout))
    }

    pub(crate) fn individual_parameters(
        &self,
        theta: &[f64],
        eta: ArrayView2<f64>,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        let rows = self.individual_theta(theta, covariates, eta.nrows())?;
        Ok(self
            .base
            .location_scale()?
            .individual_parameters_rows(rows.view(), eta))
    }

    /// `covariates` holds either one row per sample or a single row shared by all samples.
    pub(crate) fn sample(
        &self,
        theta: &[f64],
        n_samples: usize,
        rng: &mut dyn RngCore,
        covariates: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, PopulationError> {
        let rows = self.individual_theta(theta, covariates, n_samples)?;
        self.base
            .location_scale()?
            .sample_rows(rows.view(), n_samples, rng)
    }
}

fn lowercase_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{GaussianModel, LogNormalModel, PooledModel};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn log_linear(n_covariates: usize) -> CovariatePopulationModel {
        CovariatePopulationModel::new(
            LogNormalModel::new(1, false).unwrap().into(),
            LinearCovariateModel::new(n_covariates),
        )
        .unwrap()
    }

    #[test]
    fn rejects_unsupported_base_models() {
        let result = CovariatePopulationModel::new(
            GaussianModel::new(2, true).unwrap().into(),
            LinearCovariateModel::new(1),
        );
        assert!(matches!(result, Err(PopulationError::InvalidModel(_))));

        let result = CovariatePopulationModel::new(
            PooledModel::new(1).unwrap().into(),
            LinearCovariateModel::new(1),
        );
        assert!(matches!(result, Err(PopulationError::InvalidModel(_))));
    }

    #[test]
    fn names_follow_the_base_model() {
        let model = log_linear(2);
        let names = model.labels().parameter_names(model.default_names(), false);
        assert_eq!(
            names,
            vec![
                "Base log mean Dim. 1",
                "Log std. Dim. 1",
                "Shift Covariate 1 Dim. 1",
                "Shift Covariate 2 Dim. 1"
            ]
        );
    }

    #[test]
    fn covariates_shift_the_log_location() {
        let model = log_linear(2);
        let eta = array![[0.2], [-0.3], [1.0], [5.0]];
        let covariates = array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0], [6.0, 7.0]];
        let psi = model
            .individual_parameters(&[0.3, 1e-20, 100.0, -100.0], eta.view(), Some(covariates.view()))
            .unwrap();
        for i in 0..4 {
            let c = covariates.row(i);
            assert_relative_eq!(
                psi[[i, 0]],
                (0.3 + 100.0 * c[0] - 100.0 * c[1]).exp(),
                max_relative = 1e-10
            );
        }
    }

    #[test]
    fn covariates_are_validated() {
        let model = log_linear(2);
        let eta = array![[0.2], [-0.3]];
        let wrong = array![[1.0, 2.0, 3.0], [1.0, 2.0, 3.0]];
        let result = model.individual_parameters(&[0.0, 1.0, 1.0, 1.0], eta.view(), Some(wrong.view()));
        assert!(matches!(result, Err(PopulationError::Covariates { expected: 2, found: 3 })));

        let result = model.individual_parameters(&[0.0, 1.0, 1.0, 1.0], eta.view(), None);
        assert!(matches!(result, Err(PopulationError::MissingCovariates(2))));
    }

    #[test]
    fn non_centered_score_does_not_depend_on_shifts() {
        let model = log_linear(1);
        let eta = array![[0.0], [1.0], [2.0]];
        let covariates = array![[1.0], [2.0], [3.0]];
        let sens = model
            .sensitivities(
                &[-1.0, 10.0, 1.0],
                eta.view(),
                None,
                Some(covariates.view()),
                GradientLayout::Flattened,
            )
            .unwrap();
        assert_eq!(sens.dpsi, array![[-0.0], [-1.0], [-2.0]]);
        assert_eq!(sens.dtheta, array![[0.0, 0.0, 0.0]]);
    }
}
