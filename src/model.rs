//! Hierarchical ZINB model description.
//!
//! [`ModelSpec`] is a backend-neutral description of the model for one refinement iteration: the
//! variant chosen by the area partition, the current priors, and the ordered list of monitored
//! nodes. Sampling backends lower it into whatever they run; `Display` renders it as BUGS-style
//! text for logs.
//!
//! # Model
//! For every sampled area `i`:
//! - `y[i] ~ NegBin(p[i], r[i])`, `p = mu_eff·phi / (1 + mu_eff·phi)`, `r = mu_eff²·phi`
//! - `mu_eff[i] = (1 - pi[i])·mu[i]`
//! - `log(mu[i]) = x[i]·b + u[i]`, `logit(pi[i]) = x[i]·g + v[i]`
//! - `u[i] ~ N(0, 1/tau.u)`, `v[i] ~ N(0, 1/tau.v)`, `phi[i] ~ Gamma(tau.pa, tau.pb)`
//!
//! Non-sampled areas (mixed variant only) reuse the regression structure with the prior means
//! `mu.b`, `mu.g` plugged in as fixed coefficients and contribute no likelihood.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::area::{Partition, SamplingMode};
use crate::hyper::{GammaPrior, HyperParameters};
use crate::sampler::Node;

/// Normal prior in mean/precision form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalPrior {
    pub mean: f64,
    pub precision: f64,
}

/// Structural variant of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    /// Every area has an observed outcome.
    FullySampled { n: usize },
    /// Some areas are prediction-only.
    Mixed {
        n_sampled: usize,
        n_nonsampled: usize,
        /// Fixed intensity coefficients for the non-sampled block.
        plug_in_b: Vec<f64>,
        /// Fixed zero-inflation coefficients for the non-sampled block.
        plug_in_g: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub variant: Variant,
    pub nvar: usize,
    pub b: Vec<NormalPrior>,
    pub g: Vec<NormalPrior>,
    pub tau_u: GammaPrior,
    pub tau_v: GammaPrior,
    pub tau_pa: GammaPrior,
    pub tau_pb: GammaPrior,
    /// Monitored nodes, in the order the sampler reports them.
    pub monitors: Vec<Node>,
}

impl ModelSpec {
    /// Model for one refinement iteration under the current hyperparameters.
    pub fn build(hyper: &HyperParameters, partition: &Partition) -> Self {
        let nvar = hyper.nvar();
        debug_assert_eq!(nvar, partition.nvar());
        let n1 = partition.n_sampled();
        let n2 = partition.n_nonsampled();

        let variant = match partition.mode() {
            SamplingMode::FullySampled => Variant::FullySampled { n: n1 },
            SamplingMode::Mixed => Variant::Mixed {
                n_sampled: n1,
                n_nonsampled: n2,
                plug_in_b: hyper.mu_b.clone(),
                plug_in_g: hyper.mu_g.clone(),
            },
        };
        let normal = |means: &[f64], precisions: &[f64]| {
            means
                .iter()
                .zip(precisions)
                .map(|(&mean, &precision)| NormalPrior { mean, precision })
                .collect::<Vec<_>>()
        };

        Self {
            variant,
            nvar,
            b: normal(&hyper.mu_b, &hyper.tau_b),
            g: normal(&hyper.mu_g, &hyper.tau_g),
            tau_u: hyper.tau_u,
            tau_v: hyper.tau_v,
            tau_pa: hyper.tau_pa,
            tau_pb: hyper.tau_pb,
            monitors: monitor_order(nvar, n1, n2),
        }
    }

    pub fn mode(&self) -> SamplingMode {
        match self.variant {
            Variant::FullySampled { .. } => SamplingMode::FullySampled,
            Variant::Mixed { .. } => SamplingMode::Mixed,
        }
    }

    pub fn n_sampled(&self) -> usize {
        match self.variant {
            Variant::FullySampled { n } => n,
            Variant::Mixed { n_sampled, .. } => n_sampled,
        }
    }

    pub fn n_nonsampled(&self) -> usize {
        match self.variant {
            Variant::FullySampled { .. } => 0,
            Variant::Mixed { n_nonsampled, .. } => n_nonsampled,
        }
    }
}

/// `[a.var.u, a.var.v, b[..], g[..], mu_eff[..], mu_eff_nonsampled[..], tau.pa, tau.pb, tau.u, tau.v]`
pub fn monitor_order(nvar: usize, n_sampled: usize, n_nonsampled: usize) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(2 * nvar + n_sampled + n_nonsampled + 6);
    nodes.extend([Node::VarU, Node::VarV]);
    nodes.extend((0..nvar).map(Node::B));
    nodes.extend((0..nvar).map(Node::G));
    nodes.extend((0..n_sampled).map(Node::MuEff));
    nodes.extend((0..n_nonsampled).map(Node::MuEffNonsampled));
    nodes.extend([Node::TauPa, Node::TauPb, Node::TauU, Node::TauV]);
    nodes
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model {{")?;
        writeln!(f, "  for (i in 1:{}) {{", self.n_sampled())?;
        writeln!(f, "    y[i] ~ dnegbin(p[i], r[i])")?;
        writeln!(f, "    p[i] <- mu_eff[i] * phi[i] / (1 + mu_eff[i] * phi[i])")?;
        writeln!(f, "    r[i] <- pow(mu_eff[i], 2) * phi[i]")?;
        writeln!(f, "    phi[i] ~ dgamma(tau.pa, tau.pb)")?;
        writeln!(f, "    mu_eff[i] <- (1 - pi[i]) * mu[i]")?;
        writeln!(f, "    log(mu[i]) <- inprod(x[i, ], b[]) + u[i]")?;
        writeln!(f, "    logit(pi[i]) <- inprod(x[i, ], g[]) + v[i]")?;
        writeln!(f, "    u[i] ~ dnorm(0, tau.u)")?;
        writeln!(f, "    v[i] ~ dnorm(0, tau.v)")?;
        writeln!(f, "  }}")?;

        if let Variant::Mixed {
            n_nonsampled,
            plug_in_b,
            plug_in_g,
            ..
        } = &self.variant
        {
            writeln!(f, "  for (j in 1:{n_nonsampled}) {{")?;
            writeln!(
                f,
                "    mu_eff_nonsampled[j] <- (1 - pi.ns[j]) * mu.ns[j]"
            )?;
            writeln!(
                f,
                "    log(mu.ns[j]) <- inprod(x.ns[j, ], c({})) + u.ns[j]",
                join(plug_in_b)
            )?;
            writeln!(
                f,
                "    logit(pi.ns[j]) <- inprod(x.ns[j, ], c({})) + v.ns[j]",
                join(plug_in_g)
            )?;
            writeln!(f, "    u.ns[j] ~ dnorm(0, tau.u)")?;
            writeln!(f, "    v.ns[j] ~ dnorm(0, tau.v)")?;
            writeln!(f, "  }}")?;
        }

        for (k, prior) in self.b.iter().enumerate() {
            writeln!(f, "  b[{}] ~ dnorm({}, {})", k + 1, prior.mean, prior.precision)?;
        }
        for (k, prior) in self.g.iter().enumerate() {
            writeln!(f, "  g[{}] ~ dnorm({}, {})", k + 1, prior.mean, prior.precision)?;
        }
        for (name, prior) in [
            ("tau.u", self.tau_u),
            ("tau.v", self.tau_v),
            ("tau.pa", self.tau_pa),
            ("tau.pb", self.tau_pb),
        ] {
            writeln!(f, "  {name} ~ dgamma({}, {})", prior.shape, prior.rate)?;
        }
        writeln!(f, "  a.var.u <- 1 / tau.u")?;
        writeln!(f, "  a.var.v <- 1 / tau.v")?;
        write!(f, "}}")
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
