//! Hierarchical mixed-effects population models.
//!
//! Individual log-likelihoods are coupled through population models that
//! describe how each structural parameter varies across individuals. The
//! resulting [`HierarchicalLogLikelihood`] is a scalar function of one flat
//! parameter vector with an analytic gradient, ready for optimisers and
//! gradient-based samplers.
//!
//! ```rust
//! use popmix::prelude::*;
//!
//! let observations = Observations::single(vec![0.5, 1.0, 2.0], vec![4.0, 3.1, 1.8]).unwrap();
//! let individual = LogLikelihood::new(
//!     OneCompartmentModel::new(),
//!     vec![ResidualErrorModel::Constant],
//!     observations,
//! )
//! .unwrap();
//!
//! let population_models: Vec<PopulationModel> = vec![
//!     PooledModel::new(1).unwrap().into(),
//!     LogNormalModel::new(1, false).unwrap().into(),
//!     PooledModel::new(2).unwrap().into(),
//! ];
//! let log_likelihood = HierarchicalLogLikelihood::new(vec![individual], population_models).unwrap();
//! assert_eq!(log_likelihood.n_parameters(false), 6);
//!
//! let score = log_likelihood.evaluate(&[10.0, -0.7, 0.1, 0.2, 2.0, 0.3]).unwrap();
//! assert!(score.is_finite());
//! ```

pub mod data;
pub mod error;
pub mod likelihood;
pub mod optimize;
pub mod population;
pub mod reduce;
pub mod simulator;

pub use crate::data::{ErrorModel, Observations, ResidualErrorModel};
pub use crate::likelihood::{
    HierarchicalLogLikelihood, HierarchicalLogPosterior, IndividualLogLikelihood, LogLikelihood,
    LogPdf, LogPosterior, LogPrior, Prior, ReducedLogLikelihood,
};
pub use crate::optimize::{MapEstimate, MapOptimizer, MapOptions};
pub use crate::population::{GradientLayout, PopulationModel, Sensitivities};
pub use crate::simulator::{MechanisticModel, OneCompartmentModel};
pub use error::PopulationError;

pub mod prelude {
    pub use crate::data::{ErrorModel, Observations, ResidualErrorModel};
    pub use crate::likelihood::{
        HierarchicalLogLikelihood, HierarchicalLogPosterior, IndividualLogLikelihood,
        LogLikelihood, LogPdf, LogPosterior, LogPrior, Prior, ReducedLogLikelihood,
    };
    pub use crate::optimize::{MapEstimate, MapOptimizer, MapOptions};
    pub use crate::population::{
        ComposedPopulationModel, CovariatePopulationModel, GaussianModel, GradientLayout,
        HeterogeneousModel, LinearCovariateModel, LogNormalModel, PooledModel, PopulationModel,
        ReducedPopulationModel, Sensitivities, TruncatedGaussianModel,
    };
    pub use crate::simulator::{MechanisticModel, OneCompartmentModel};
    pub use crate::PopulationError;
}
