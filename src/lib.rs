//! # Small-Area Estimation with a Zero-Inflated Negative Binomial Model
//!
//! This crate estimates area-level means of count outcomes that contain an excess of zeros,
//! using a hierarchical Bayesian zero-inflated negative binomial (ZINB) model. The prior
//! hyperparameters are not fixed up front: they are refined by repeatedly fitting the model and
//! moment-matching the posterior back into the priors (an empirical-Bayes style loop).
//!
//! ## Features
//!
//! - **Area partitioning:** areas without an observed outcome are split off and predicted from
//!   their covariates alone, see [`partition`].
//! - **Refinement loop:** [`ZinbEstimator::fit`] runs a fixed number of build/sample/refine
//!   rounds and reshapes the final posterior into result tables.
//! - **Pluggable samplers:** any engine implementing [`PosteriorSampler`] can be used. The bundled
//!   [`GibbsZinb`] is a Metropolis-within-Gibbs engine on top of `mini_mcmc`.
//!
//! ## Model
//!
//! For a sampled area `i` with covariate row `x[i]` (intercept first):
//!
//! ```text
//! y[i]       ~ NegBin(p[i], r[i])
//! p[i]       = mu_eff[i]·phi[i] / (1 + mu_eff[i]·phi[i]),   r[i] = mu_eff[i]²·phi[i]
//! mu_eff[i]  = (1 - pi[i])·mu[i]
//! log mu[i]  = x[i]·b + u[i],     logit pi[i] = x[i]·g + v[i]
//! ```
//!
//! `mu_eff` is the reported area estimate. See [`model`] for the full hierarchy.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use ndarray::array;
//! use sae_zinb::{AreaData, EstimationConfig, GibbsZinb, ZinbEstimator};
//!
//! let data = AreaData::new(
//!     vec![Some(0), Some(4), None, Some(1)],
//!     array![[0.3], [1.1], [0.7], [0.2]],
//! );
//! let config = EstimationConfig::default().with_iter_update(3).with_seed(7);
//! let estimation = ZinbEstimator::new(config, GibbsZinb::new()).fit(&data)?;
//! println!("{:?}", estimation.result.estimates.column("mean"));
//! # Ok::<(), sae_zinb::ZinbError>(())
//! ```
//!
//! The `demos` directory in the repository contains a runnable end-to-end example.
//!
//! ## License
//! This crate is dual-licensed under the MIT OR Apache-2.0 licenses.

pub mod area;
pub mod config;
pub mod error;
pub mod estimator;
pub mod hyper;
pub mod model;
pub mod result;
pub mod sampler;

pub use area::{AreaData, AreaSlot, Partition, SamplingMode, partition};
pub use config::{EstimationConfig, McmcSchedule};
pub use error::{ConfigError, ZinbError};
pub use estimator::{Estimation, ZinbEstimator};
pub use hyper::{GammaPrior, HyperParameters};
pub use model::{ModelSpec, NormalPrior, Variant, monitor_order};
pub use result::{COLUMNS, EstimationResult, Table, assemble};
pub use sampler::{
    GibbsZinb, InitialValues, ModelData, Node, NodeSummary, PosteriorDraws, PosteriorSampler,
    PosteriorSummary, QUANTILE_PROBS, SamplingRequest,
};
