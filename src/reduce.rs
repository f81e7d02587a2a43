//! Fixing of named parameters.
//!
//! A [`ParameterReducer`] never touches the model it belongs to. It only knows
//! which positions of the full parameter vector are pinned to constants and
//! maps between the reduced (free) and the full vector.

use std::collections::BTreeMap;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::PopulationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterReducer {
    n_parameters: usize,
    fixed: BTreeMap<usize, f64>,
    free: Vec<usize>,
}

impl ParameterReducer {
    pub fn new(n_parameters: usize) -> Self {
        Self {
            n_parameters,
            fixed: BTreeMap::new(),
            free: (0..n_parameters).collect(),
        }
    }

    /// Number of parameters of the underlying model.
    pub fn n_parameters(&self) -> usize {
        self.n_parameters
    }

    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    pub fn n_fixed(&self) -> usize {
        self.fixed.len()
    }

    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    pub fn fixed_values(&self) -> &BTreeMap<usize, f64> {
        &self.fixed
    }

    /// Fixes (`Some`) or frees (`None`) parameters by name.
    ///
    /// `names` are the names of the underlying model's full parameter vector.
    /// Either all updates are applied or, if a name is unknown, none is.
    pub fn fix<I, S>(&mut self, names: &[String], updates: I) -> Result<(), PopulationError>
    where
        I: IntoIterator<Item = (S, Option<f64>)>,
        S: AsRef<str>,
    {
        if names.len() != self.n_parameters {
            return Err(PopulationError::NameLength {
                expected: self.n_parameters,
                found: names.len(),
            });
        }
        let mut resolved = Vec::new();
        for (name, value) in updates {
            let name = name.as_ref();
            let index = names
                .iter()
                .position(|candidate| candidate == name)
                .ok_or_else(|| PopulationError::UnknownParameter(name.to_string()))?;
            resolved.push((index, value));
        }

        for (index, value) in resolved {
            match value {
                Some(value) => {
                    self.fixed.insert(index, value);
                }
                None => {
                    self.fixed.remove(&index);
                }
            }
        }
        self.free = (0..self.n_parameters)
            .filter(|index| !self.fixed.contains_key(index))
            .collect();
        Ok(())
    }

    /// Inserts the free values into a full parameter vector.
    pub fn embed(&self, reduced: &[f64]) -> Result<Vec<f64>, PopulationError> {
        if reduced.len() != self.free.len() {
            return Err(PopulationError::ParameterCount {
                expected: self.free.len(),
                found: reduced.len(),
            });
        }
        let mut full = vec![0.0; self.n_parameters];
        for (&index, &value) in &self.fixed {
            full[index] = value;
        }
        for (&index, &value) in self.free.iter().zip(reduced) {
            full[index] = value;
        }
        Ok(full)
    }

    /// Drops the entries at fixed positions.
    pub fn project<T: Clone>(&self, full: &[T]) -> Vec<T> {
        self.free.iter().map(|&index| full[index].clone()).collect()
    }

    /// Drops the columns at fixed positions.
    pub fn project_columns(&self, full: &Array2<f64>) -> Array2<f64> {
        full.select(Axis(1), &self.free)
    }
}
