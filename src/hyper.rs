//! Empirical-Bayes hyperparameter state and its moment-matching update.
//!
//! After every sampler call the posterior mean and standard deviation of each coefficient become
//! the next prior mean and precision, and each Gamma-distributed precision node is replaced by the
//! Gamma distribution with the same first two moments.

use serde::{Deserialize, Serialize};

use crate::config::EstimationConfig;
use crate::error::ZinbError;
use crate::sampler::{Node, PosteriorSummary};

/// Shape/rate parameterised Gamma prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaPrior {
    pub shape: f64,
    pub rate: f64,
}

impl GammaPrior {
    pub const fn new(shape: f64, rate: f64) -> Self {
        Self { shape, rate }
    }

    /// Method-of-moments Gamma with mean `mean` and standard deviation `sd`:
    /// shape `m²/s²`, rate `m/s²`.
    pub fn from_moments(mean: f64, sd: f64) -> Self {
        let var = sd * sd;
        Self {
            shape: mean * mean / var,
            rate: mean / var,
        }
    }

    pub fn mean(&self) -> f64 {
        self.shape / self.rate
    }

    fn is_valid(&self) -> bool {
        self.shape > 0.0 && self.rate > 0.0
    }
}

/// Prior hyperparameters carried from one refinement iteration to the next.
///
/// `mu_*` are the prior means and `tau_*` the prior precisions of the intensity (`b`) and
/// zero-inflation (`g`) coefficients. The four Gamma priors govern the random-effect precisions
/// (`tau_u`, `tau_v`) and the shape/rate of the per-area dispersion (`tau_pa`, `tau_pb`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    pub mu_b: Vec<f64>,
    pub tau_b: Vec<f64>,
    pub mu_g: Vec<f64>,
    pub tau_g: Vec<f64>,
    /// `(tau.ua, tau.ub)`
    pub tau_u: GammaPrior,
    /// `(tau.va, tau.vb)`
    pub tau_v: GammaPrior,
    /// `(tau.aa, tau.ab)`
    pub tau_pa: GammaPrior,
    /// `(tau.ba, tau.bb)`
    pub tau_pb: GammaPrior,
}

impl HyperParameters {
    /// Initial state: configured coefficient priors (variances turned into precisions) and unit
    /// Gamma priors.
    ///
    /// `config` must already have passed [`EstimationConfig::validate`] for this `nvar`.
    pub fn initial(config: &EstimationConfig, nvar: usize) -> Self {
        let means = |v: &Option<Vec<f64>>| v.clone().unwrap_or_else(|| vec![0.0; nvar]);
        let precisions = |v: &Option<Vec<f64>>| {
            v.as_ref()
                .map_or_else(|| vec![1.0; nvar], |v| v.iter().map(|x| 1.0 / x).collect())
        };
        Self {
            mu_b: means(&config.coef_nonzero),
            tau_b: precisions(&config.var_coef_nonzero),
            mu_g: means(&config.coef_zero),
            tau_g: precisions(&config.var_coef_zero),
            tau_u: GammaPrior::new(1.0, 1.0),
            tau_v: GammaPrior::new(1.0, 1.0),
            tau_pa: GammaPrior::new(1.0, 1.0),
            tau_pb: GammaPrior::new(1.0, 1.0),
        }
    }

    pub fn nvar(&self) -> usize {
        self.mu_b.len()
    }

    /// Replace every hyperparameter with its moment-matched counterpart from `posterior`.
    ///
    /// A coefficient whose posterior standard deviation is exactly zero gets an infinite
    /// precision.
    ///
    /// # Errors
    /// [`ZinbError::Sampling`] when a node is missing from `posterior` or its moments do not
    /// define a valid prior (NaN, or a non-positive precision node).
    pub fn refine(&mut self, posterior: &PosteriorSummary) -> Result<(), ZinbError> {
        let nvar = self.nvar();
        let mut next = self.clone();
        for k in 0..nvar {
            (next.mu_b[k], next.tau_b[k]) = normal_moments(posterior, Node::B(k))?;
            (next.mu_g[k], next.tau_g[k]) = normal_moments(posterior, Node::G(k))?;
        }
        next.tau_pa = gamma_moments(posterior, Node::TauPa)?;
        next.tau_pb = gamma_moments(posterior, Node::TauPb)?;
        next.tau_u = gamma_moments(posterior, Node::TauU)?;
        next.tau_v = gamma_moments(posterior, Node::TauV)?;

        debug_assert_eq!(next.nvar(), nvar);
        *self = next;
        Ok(())
    }
}

fn normal_moments(posterior: &PosteriorSummary, node: Node) -> Result<(f64, f64), ZinbError> {
    let stats = posterior.require(node)?;
    let precision = 1.0 / (stats.sd * stats.sd);
    if stats.mean.is_nan() || !(precision > 0.0) {
        return Err(ZinbError::sampling(format!(
            "posterior of {node} has mean {} and sd {}, cannot form a prior",
            stats.mean, stats.sd
        )));
    }
    if precision.is_infinite() {
        tracing::warn!(%node, "posterior sd is zero, prior precision becomes infinite");
    }
    Ok((stats.mean, precision))
}

fn gamma_moments(posterior: &PosteriorSummary, node: Node) -> Result<GammaPrior, ZinbError> {
    let stats = posterior.require(node)?;
    let prior = GammaPrior::from_moments(stats.mean, stats.sd);
    if !prior.is_valid() {
        return Err(ZinbError::sampling(format!(
            "posterior of {node} has mean {} and sd {}, cannot match a Gamma prior",
            stats.mean, stats.sd
        )));
    }
    Ok(prior)
}
