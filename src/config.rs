//! Estimation settings and their validation.
//!
//! All checks run eagerly in [`EstimationConfig::validate`], before the first sampler call, so a
//! bad setting never costs a sampling run.

use crate::error::ConfigError;

/// Sampling schedule handed to the [`crate::PosteriorSampler`] on every refinement iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McmcSchedule {
    /// Draws per chain, burn-in included.
    pub iter_mcmc: usize,
    /// Leading draws discarded from every chain.
    pub burn_in: usize,
    /// Keep every `thin`-th draw after burn-in.
    pub thin: usize,
    pub n_chains: usize,
    /// Sweeps used to tune proposal scales before `iter_mcmc` starts.
    pub n_adapt: usize,
    pub seed: u64,
}

impl McmcSchedule {
    /// Draws kept per chain once burn-in and thinning are applied.
    #[must_use]
    pub const fn retained_draws(&self) -> usize {
        (self.iter_mcmc.saturating_sub(self.burn_in) + self.thin.saturating_sub(1)) / self.thin
    }

    /// Draws stored per chain before thinning.
    #[must_use]
    pub const fn post_burn_in(&self) -> usize {
        self.iter_mcmc.saturating_sub(self.burn_in)
    }
}

/// User-facing options of a ZINB small-area fit.
///
/// Coefficient vectors default to zero means and unit variances of length `nvar`
/// (number of covariates plus the intercept); when given they must have exactly that length.
///
/// # Example
/// ```
/// use sae_zinb::EstimationConfig;
///
/// let config = EstimationConfig::default()
///     .with_iter_update(5)
///     .with_iter_mcmc(2_000)
///     .with_burn_in(1_000)
///     .with_coef_nonzero(vec![0.5, 0.0, 0.0]);
/// assert!(config.validate(3).is_ok());
/// assert!(config.validate(2).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationConfig {
    pub iter_update: usize,
    pub iter_mcmc: usize,
    pub burn_in: usize,
    pub thin: usize,
    pub n_chains: usize,
    pub n_adapt: usize,
    pub seed: u64,
    /// Initial prior means of the intensity coefficients `b`.
    pub coef_nonzero: Option<Vec<f64>>,
    /// Initial prior variances of the intensity coefficients `b`.
    pub var_coef_nonzero: Option<Vec<f64>>,
    /// Initial prior means of the zero-inflation coefficients `g`.
    pub coef_zero: Option<Vec<f64>>,
    /// Initial prior variances of the zero-inflation coefficients `g`.
    pub var_coef_zero: Option<Vec<f64>>,
    /// Starting value of the intensity random-effect precision.
    pub tau_u: f64,
    /// Starting value of the zero-inflation random-effect precision.
    pub tau_v: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            iter_update: 3,
            iter_mcmc: 1_100,
            burn_in: 600,
            thin: 1,
            n_chains: 1,
            n_adapt: 100,
            seed: 42,
            coef_nonzero: None,
            var_coef_nonzero: None,
            coef_zero: None,
            var_coef_zero: None,
            tau_u: 1.0,
            tau_v: 1.0,
        }
    }
}

impl EstimationConfig {
    #[must_use]
    pub fn with_iter_update(mut self, iter_update: usize) -> Self {
        self.iter_update = iter_update;
        self
    }

    #[must_use]
    pub fn with_iter_mcmc(mut self, iter_mcmc: usize) -> Self {
        self.iter_mcmc = iter_mcmc;
        self
    }

    #[must_use]
    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    #[must_use]
    pub fn with_thin(mut self, thin: usize) -> Self {
        self.thin = thin;
        self
    }

    #[must_use]
    pub fn with_chains(mut self, n_chains: usize) -> Self {
        self.n_chains = n_chains;
        self
    }

    #[must_use]
    pub fn with_adaptation(mut self, n_adapt: usize) -> Self {
        self.n_adapt = n_adapt;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_coef_nonzero(mut self, coef: Vec<f64>) -> Self {
        self.coef_nonzero = Some(coef);
        self
    }

    #[must_use]
    pub fn with_var_coef_nonzero(mut self, var: Vec<f64>) -> Self {
        self.var_coef_nonzero = Some(var);
        self
    }

    #[must_use]
    pub fn with_coef_zero(mut self, coef: Vec<f64>) -> Self {
        self.coef_zero = Some(coef);
        self
    }

    #[must_use]
    pub fn with_var_coef_zero(mut self, var: Vec<f64>) -> Self {
        self.var_coef_zero = Some(var);
        self
    }

    #[must_use]
    pub fn with_random_effect_precisions(mut self, tau_u: f64, tau_v: f64) -> Self {
        self.tau_u = tau_u;
        self.tau_v = tau_v;
        self
    }

    /// The sampling part of the configuration.
    #[must_use]
    pub const fn schedule(&self) -> McmcSchedule {
        McmcSchedule {
            iter_mcmc: self.iter_mcmc,
            burn_in: self.burn_in,
            thin: self.thin,
            n_chains: self.n_chains,
            n_adapt: self.n_adapt,
            seed: self.seed,
        }
    }

    /// Check every option against a design with `nvar` coefficients per sub-model.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self, nvar: usize) -> Result<(), ConfigError> {
        if self.iter_update < 3 {
            return Err(ConfigError::TooFewIterations(self.iter_update));
        }
        if self.burn_in >= self.iter_mcmc {
            return Err(ConfigError::InvalidBurnIn {
                burn_in: self.burn_in,
                iter_mcmc: self.iter_mcmc,
            });
        }
        if self.thin == 0 {
            return Err(ConfigError::InvalidThinning);
        }
        let retained = self.schedule().retained_draws();
        if retained < 2 {
            return Err(ConfigError::TooFewDraws(retained));
        }
        if self.n_chains == 0 {
            return Err(ConfigError::NoChains);
        }

        check_length("coef_nonzero", self.coef_nonzero.as_deref(), nvar)?;
        check_length("coef_zero", self.coef_zero.as_deref(), nvar)?;
        check_length("var_coef_nonzero", self.var_coef_nonzero.as_deref(), nvar)?;
        check_length("var_coef_zero", self.var_coef_zero.as_deref(), nvar)?;
        check_variances("var_coef_nonzero", self.var_coef_nonzero.as_deref())?;
        check_variances("var_coef_zero", self.var_coef_zero.as_deref())?;

        if !(self.tau_u > 0.0 && self.tau_u.is_finite()) {
            return Err(ConfigError::NonPositivePrecision("tau_u"));
        }
        if !(self.tau_v > 0.0 && self.tau_v.is_finite()) {
            return Err(ConfigError::NonPositivePrecision("tau_v"));
        }
        Ok(())
    }
}

fn check_length(name: &'static str, values: Option<&[f64]>, nvar: usize) -> Result<(), ConfigError> {
    match values {
        Some(v) if v.len() != nvar => Err(ConfigError::CoefficientLength {
            name,
            len: v.len(),
            nvar,
        }),
        _ => Ok(()),
    }
}

fn check_variances(name: &'static str, values: Option<&[f64]>) -> Result<(), ConfigError> {
    match values {
        Some(v) if v.iter().any(|&x| !(x > 0.0 && x.is_finite())) => {
            Err(ConfigError::NonPositiveVariance(name))
        }
        _ => Ok(()),
    }
}
