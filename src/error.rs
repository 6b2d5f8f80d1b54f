//! Error taxonomy for the estimation pipeline.

use thiserror::Error;

/// Invalid estimation settings, detected before any sampling happens.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("iter_update must be at least 3, got {0}")]
    TooFewIterations(usize),
    #[error("burn-in ({burn_in}) must be smaller than iter_mcmc ({iter_mcmc})")]
    InvalidBurnIn { burn_in: usize, iter_mcmc: usize },
    #[error("thinning interval must be a positive integer")]
    InvalidThinning,
    #[error("schedule retains {0} draws per chain, at least 2 are needed")]
    TooFewDraws(usize),
    #[error("at least one chain is required")]
    NoChains,
    #[error("`{name}` has length {len}, expected nvar = {nvar}")]
    CoefficientLength {
        name: &'static str,
        len: usize,
        nvar: usize,
    },
    #[error("`{0}` must contain only strictly positive variances")]
    NonPositiveVariance(&'static str),
    #[error("`{0}` must be a strictly positive precision")]
    NonPositivePrecision(&'static str),
}

/// Errors returned by [`crate::ZinbEstimator::fit`] and the pieces it drives.
///
/// No variant carries a partial result: a failed fit leaves nothing behind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZinbError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("sampling failed: {0}")]
    Sampling(String),
}

impl ZinbError {
    pub(crate) fn sampling(msg: impl Into<String>) -> Self {
        Self::Sampling(msg.into())
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
