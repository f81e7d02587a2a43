use argmin::{
    core::{CostFunction, Error, Executor, Gradient},
    solver::neldermead::NelderMead,
};
use tracing::{debug, warn};

use crate::error::PopulationError;
use crate::likelihood::LogPdf;

/// Settings of the Nelder-Mead search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapOptions {
    pub max_iters: u64,
    pub sd_tolerance: f64,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            sd_tolerance: 1e-8,
        }
    }
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_sd_tolerance(mut self, sd_tolerance: f64) -> Self {
        self.sd_tolerance = sd_tolerance;
        self
    }
}

/// Best point found by [`MapOptimizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct MapEstimate {
    pub parameters: Vec<f64>,
    pub score: f64,
}

/// Maximum a posteriori (or maximum likelihood) point estimation of a [`LogPdf`].
///
/// Exposes the negated log-pdf as an argmin cost function and gradient.
pub struct MapOptimizer<'a, P: LogPdf> {
    log_pdf: &'a P,
    options: MapOptions,
}

impl<P: LogPdf> CostFunction for MapOptimizer<'_, P> {
    type Param = Vec<f64>;
    type Output = f64;
    fn cost(&self, parameters: &Self::Param) -> Result<Self::Output, Error> {
        Ok(-self.log_pdf.evaluate(parameters)?)
    }
}

impl<P: LogPdf> Gradient for MapOptimizer<'_, P> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;
    fn gradient(&self, parameters: &Self::Param) -> Result<Self::Gradient, Error> {
        let (_, gradient) = self.log_pdf.evaluate_s1(parameters)?;
        Ok(gradient.into_iter().map(|g| -g).collect())
    }
}

impl<'a, P: LogPdf> MapOptimizer<'a, P> {
    pub fn new(log_pdf: &'a P) -> Self {
        Self {
            log_pdf,
            options: MapOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MapOptions) -> Self {
        self.options = options;
        self
    }

    pub fn optimize_point(&self, initial: Vec<f64>) -> Result<MapEstimate, PopulationError> {
        if initial.len() != self.log_pdf.n_parameters() {
            return Err(PopulationError::ParameterCount {
                expected: self.log_pdf.n_parameters(),
                found: initial.len(),
            });
        }
        let simplex = create_initial_simplex(&initial);
        let solver: NelderMead<Vec<f64>, f64> =
            NelderMead::new(simplex).with_sd_tolerance(self.options.sd_tolerance)?;
        let optimizer = MapOptimizer {
            log_pdf: self.log_pdf,
            options: self.options,
        };
        let res = Executor::new(optimizer, solver)
            .configure(|state| state.max_iters(self.options.max_iters))
            .run()?;
        let state = res.state;
        debug!(
            "Nelder-Mead stopped after {} iterations: {:?}",
            state.iter, state.termination_status
        );
        let parameters = state.best_param.ok_or_else(|| {
            PopulationError::Optimization(anyhow::anyhow!("no parameters were evaluated"))
        })?;
        Ok(MapEstimate {
            parameters,
            score: -state.best_cost,
        })
    }

    /// Runs [`MapOptimizer::optimize_point`] from every initial point and
    /// keeps the best estimate. Failed runs are skipped.
    pub fn optimize_points(&self, initial: Vec<Vec<f64>>) -> Result<MapEstimate, PopulationError> {
        let mut best: Option<MapEstimate> = None;
        let mut last_error = None;
        for (run, point) in initial.into_iter().enumerate() {
            match self.optimize_point(point) {
                Ok(estimate) => {
                    if best.as_ref().map_or(true, |b| estimate.score > b.score) {
                        best = Some(estimate);
                    }
                }
                Err(e) => {
                    warn!("Optimisation run {} failed: {}", run + 1, e);
                    last_error = Some(e);
                }
            }
        }
        match (best, last_error) {
            (Some(best), _) => Ok(best),
            (None, Some(e)) => Err(e),
            (None, None) => Err(PopulationError::Optimization(anyhow::anyhow!(
                "no initial points were given"
            ))),
        }
    }
}

fn create_initial_simplex(initial_point: &[f64]) -> Vec<Vec<f64>> {
    let perturbation_percentage = 0.05;

    let mut vertices = vec![initial_point.to_vec()];
    for i in 0..initial_point.len() {
        let perturbation = if initial_point[i] == 0.0 {
            0.00025
        } else {
            perturbation_percentage * initial_point[i]
        };

        let mut perturbed_point = initial_point.to_owned();
        perturbed_point[i] += perturbation;
        vertices.push(perturbed_point);
    }

    vertices
}
