use serde::{Deserialize, Serialize};

use crate::error::PopulationError;

/// Dimension names and optional custom parameter names of a population model.
///
/// Parameter names are stored without the dimension suffix; the suffix is
/// appended on request by [`Labels::parameter_names`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Labels {
    dim_names: Vec<String>,
    custom: Option<Vec<String>>,
}

pub(crate) fn default_dim_names(n_dim: usize) -> Vec<String> {
    (1..=n_dim).map(|k| format!("Dim. {}", k)).collect()
}

impl Labels {
    pub(crate) fn new(n_dim: usize) -> Result<Self, PopulationError> {
        if n_dim < 1 {
            return Err(PopulationError::InvalidDimension(n_dim));
        }
        Ok(Self {
            dim_names: default_dim_names(n_dim),
            custom: None,
        })
    }

    pub(crate) fn n_dim(&self) -> usize {
        self.dim_names.len()
    }

    pub(crate) fn dim_names(&self) -> Vec<String> {
        self.dim_names.clone()
    }

    pub(crate) fn set_dim_names(&mut self, names: Option<Vec<String>>) -> Result<(), PopulationError> {
        match names {
            None => self.dim_names = default_dim_names(self.n_dim()),
            Some(names) => {
                if names.len() != self.n_dim() {
                    return Err(PopulationError::NameLength {
                        expected: self.n_dim(),
                        found: names.len(),
                    });
                }
                self.dim_names = names;
            }
        }
        Ok(())
    }

    /// Replaces the parameter names. `None` restores the model defaults.
    pub(crate) fn set_parameter_names(
        &mut self,
        names: Option<Vec<String>>,
        n_parameters: usize,
    ) -> Result<(), PopulationError> {
        if let Some(names) = &names {
            if names.len() != n_parameters {
                return Err(PopulationError::NameLength {
                    expected: n_parameters,
                    found: names.len(),
                });
            }
        }
        self.custom = names;
        Ok(())
    }

    pub(crate) fn reset_parameter_names(&mut self) {
        self.custom = None;
    }

    /// Composes the final names from `(default name, dimension index)` pairs.
    pub(crate) fn parameter_names(
        &self,
        defaults: Vec<(String, usize)>,
        exclude_dim_names: bool,
    ) -> Vec<String> {
        defaults
            .into_iter()
            .enumerate()
            .map(|(index, (default, dim))| {
                let base = match &self.custom {
                    Some(custom) => custom[index].clone(),
                    None => default,
                };
                if exclude_dim_names {
                    base
                } else {
                    format!("{} {}", base, self.dim_names[dim])
                }
            })
            .collect()
    }
}

/// Default names of a model with one block of `n_dim` parameters per base name.
///
/// The order is parameter-major: `[base0 dim0, base0 dim1, base1 dim0, ...]`.
pub(crate) fn per_dimension_defaults(base: &[&str], n_dim: usize) -> Vec<(String, usize)> {
    base.iter()
        .flat_map(|name| (0..n_dim).map(move |dim| (name.to_string(), dim)))
        .collect()
}
