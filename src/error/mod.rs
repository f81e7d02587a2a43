use thiserror::Error;

#[derive(Error, Debug)]
pub enum PopulationError {
    #[error("The dimension of a population model must be at least 1, got {0}")]
    InvalidDimension(usize),
    #[error("The number of modelled individuals must be at least 1, got {0}")]
    InvalidIds(usize),
    #[error("Length of names does not match: expected {expected}, found {found}")]
    NameLength { expected: usize, found: usize },
    #[error("The number of provided parameters does not match: expected {expected}, found {found}")]
    ParameterCount { expected: usize, found: usize },
    #[error("The {what} must have {expected} columns, found {found}")]
    Columns {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("The {what} must have {expected} rows, found {found}")]
    Rows {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Covariates must be of length {expected} per individual, found {found}")]
    Covariates { expected: usize, found: usize },
    #[error("Covariates must be provided for a model with {0} covariate(s)")]
    MissingCovariates(usize),
    #[error("Invalid population model: {0}")]
    InvalidModel(String),
    #[error("{capability} is not implemented for {model} population models")]
    NotImplemented {
        capability: &'static str,
        model: &'static str,
    },
    #[error("The parameter <{0}> could not be identified")]
    UnknownParameter(String),
    #[error("A {distribution} distribution requires {requirement}")]
    InvalidDistribution {
        distribution: &'static str,
        requirement: &'static str,
    },
    #[error("The log-likelihoods cannot be composed: {0}")]
    LikelihoodMismatch(String),
    #[error("Wrong number of population models: the log-likelihoods have {expected} parameters, the population models cover {found}")]
    PopulationModelCount { expected: usize, found: usize },
    #[error("Simulation failed: {0}")]
    Simulation(String),
    #[error("Invalid observations: {0}")]
    Observations(String),
    #[error("Invalid log-prior: {0}")]
    Prior(String),
    #[error("Optimisation failed: {0}")]
    Optimization(#[from] anyhow::Error),
    #[error("Could not (de)serialise the population model: {0}")]
    Serialization(#[from] serde_json::Error),
}
