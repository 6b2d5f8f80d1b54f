//! Contract between the refinement loop and a posterior sampling engine.
//!
//! The loop hands a [`SamplingRequest`] (model, data bindings, initial values, schedule) to a
//! [`PosteriorSampler`] and receives a [`PosteriorSummary`]: per-node mean, standard deviation and
//! quantiles, addressed by [`Node`] rather than by position.
//!
//! [`GibbsZinb`] is the bundled engine, built on the `mini_mcmc` Gibbs sampler. Any other engine
//! (or a mock in tests) only has to implement [`PosteriorSampler`].

use std::collections::HashMap;
use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::{Data, OrderStatistics, Statistics};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::area::Partition;
use crate::config::{EstimationConfig, McmcSchedule};
use crate::error::ZinbError;
use crate::hyper::HyperParameters;
use crate::model::ModelSpec;

pub use gibbs::GibbsZinb;

mod gibbs;

/// Probability levels reported for every node.
pub const QUANTILE_PROBS: [f64; 5] = [0.025, 0.25, 0.5, 0.75, 0.975];

/// A monitored model quantity. Indices are zero-based; `Display` uses the one-based BUGS names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Node {
    /// `a.var.u = 1 / tau.u`
    VarU,
    /// `a.var.v = 1 / tau.v`
    VarV,
    /// Intensity coefficient `b[k]`.
    B(usize),
    /// Zero-inflation coefficient `g[k]`.
    G(usize),
    /// Area mean of the `i`-th sampled area.
    MuEff(usize),
    /// Area mean of the `j`-th non-sampled area.
    MuEffNonsampled(usize),
    TauPa,
    TauPb,
    TauU,
    TauV,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::VarU => write!(f, "a.var.u"),
            Node::VarV => write!(f, "a.var.v"),
            Node::B(k) => write!(f, "b[{}]", k + 1),
            Node::G(k) => write!(f, "g[{}]", k + 1),
            Node::MuEff(i) => write!(f, "mu_eff[{}]", i + 1),
            Node::MuEffNonsampled(j) => write!(f, "mu_eff_nonsampled[{}]", j + 1),
            Node::TauPa => write!(f, "tau.pa"),
            Node::TauPb => write!(f, "tau.pb"),
            Node::TauU => write!(f, "tau.u"),
            Node::TauV => write!(f, "tau.v"),
        }
    }
}

/// Posterior summary of one node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub mean: f64,
    pub sd: f64,
    /// Quantiles at [`QUANTILE_PROBS`].
    pub quantiles: [f64; 5],
}

impl NodeSummary {
    /// Sample mean, sample standard deviation and quantiles of `draws`.
    pub fn from_draws(draws: ArrayView1<'_, f64>) -> Self {
        let values = draws.to_vec();
        let mean = values.iter().mean();
        let sd = values.iter().std_dev();
        let mut data = Data::new(values);
        Self {
            mean,
            sd,
            quantiles: QUANTILE_PROBS.map(|p| data.quantile(p)),
        }
    }

    /// Summary of a `N(mean, sd²)` posterior. With `sd <= 0` every quantile equals the mean.
    pub fn from_moments(mean: f64, sd: f64) -> Self {
        let quantiles = match Normal::new(mean, sd) {
            Ok(normal) if sd > 0.0 => QUANTILE_PROBS.map(|p| normal.inverse_cdf(p)),
            _ => [mean; 5],
        };
        Self {
            mean,
            sd,
            quantiles,
        }
    }

    /// `[mean, sd, 2.5%, 25%, 50%, 75%, 97.5%]`
    pub fn row(&self) -> [f64; 7] {
        let [q0, q1, q2, q3, q4] = self.quantiles;
        [self.mean, self.sd, q0, q1, q2, q3, q4]
    }
}

/// Pooled posterior draws, one column per node. Kept for external diagnostics such as trace or
/// density plots.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorDraws {
    nodes: Vec<Node>,
    /// Shape `(n_draws, n_nodes)`.
    values: Array2<f64>,
}

impl PosteriorDraws {
    /// # Errors
    /// [`ZinbError::Sampling`] if the column count differs from the node count.
    pub fn new(nodes: Vec<Node>, values: Array2<f64>) -> Result<Self, ZinbError> {
        if values.ncols() != nodes.len() {
            return Err(ZinbError::sampling(format!(
                "{} draw columns for {} monitored nodes",
                values.ncols(),
                nodes.len()
            )));
        }
        Ok(Self { nodes, values })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn n_draws(&self) -> usize {
        self.values.nrows()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// All pooled draws of `node`, or `None` if it was not monitored.
    pub fn get_posterior_samples(&self, node: Node) -> Option<Vec<f64>> {
        let col = self.nodes.iter().position(|&n| n == node)?;
        Some(self.values.column(col).to_vec())
    }
}

/// Posterior statistics of every monitored node, looked up by [`Node`].
#[derive(Debug, Clone)]
pub struct PosteriorSummary {
    nodes: Vec<Node>,
    stats: Vec<NodeSummary>,
    index: HashMap<Node, usize>,
    draws: Option<PosteriorDraws>,
}

impl PosteriorSummary {
    /// Pair `nodes` with `stats` in order.
    ///
    /// # Errors
    /// [`ZinbError::Sampling`] on a length mismatch or a repeated node.
    pub fn new(nodes: Vec<Node>, stats: Vec<NodeSummary>) -> Result<Self, ZinbError> {
        if nodes.len() != stats.len() {
            return Err(ZinbError::sampling(format!(
                "{} statistics returned for {} nodes",
                stats.len(),
                nodes.len()
            )));
        }
        let mut index = HashMap::with_capacity(nodes.len());
        for (pos, &node) in nodes.iter().enumerate() {
            if index.insert(node, pos).is_some() {
                return Err(ZinbError::sampling(format!("node {node} reported twice")));
            }
        }
        Ok(Self {
            nodes,
            stats,
            index,
            draws: None,
        })
    }

    /// Summarise pooled draws column by column.
    ///
    /// # Errors
    /// [`ZinbError::Sampling`] if any draw is not finite.
    pub fn from_draws(draws: PosteriorDraws) -> Result<Self, ZinbError> {
        if let Some((row, col)) = draws
            .values
            .indexed_iter()
            .find_map(|(pos, v)| (!v.is_finite()).then_some(pos))
        {
            return Err(ZinbError::sampling(format!(
                "non-finite draw of {} at retained draw {row}",
                draws.nodes[col]
            )));
        }

        let columns = (0..draws.nodes.len()).collect::<Vec<_>>();
        #[cfg(feature = "rayon")]
        let stats = columns
            .par_iter()
            .map(|&c| NodeSummary::from_draws(draws.values.column(c)))
            .collect::<Vec<_>>();
        #[cfg(not(feature = "rayon"))]
        let stats = columns
            .iter()
            .map(|&c| NodeSummary::from_draws(draws.values.column(c)))
            .collect::<Vec<_>>();

        let mut summary = Self::new(draws.nodes.clone(), stats)?;
        summary.draws = Some(draws);
        Ok(summary)
    }

    pub fn get(&self, node: Node) -> Option<&NodeSummary> {
        self.index.get(&node).map(|&pos| &self.stats[pos])
    }

    /// Like [`Self::get`], but a missing node is a sampling failure.
    ///
    /// # Errors
    /// [`ZinbError::Sampling`] if `node` was not reported.
    pub fn require(&self, node: Node) -> Result<&NodeSummary, ZinbError> {
        self.get(node)
            .ok_or_else(|| ZinbError::sampling(format!("sampler did not report {node}")))
    }

    /// Check that every node in `monitors` was reported.
    ///
    /// # Errors
    /// [`ZinbError::Sampling`] naming the first missing node.
    pub fn ensure_monitors(&self, monitors: &[Node]) -> Result<(), ZinbError> {
        monitors.iter().try_for_each(|&node| self.require(node).map(|_| ()))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = (Node, &NodeSummary)> {
        self.nodes.iter().copied().zip(&self.stats)
    }

    pub fn draws(&self) -> Option<&PosteriorDraws> {
        self.draws.as_ref()
    }

    pub(crate) fn into_draws(self) -> Option<PosteriorDraws> {
        self.draws
    }
}

/// Data bound into the model: the two area blocks produced by the partitioner.
#[derive(Debug, Clone, Copy)]
pub struct ModelData<'a> {
    /// `(n1, nvar)`, intercept first.
    pub x_sampled: ArrayView2<'a, f64>,
    /// `(n1,)`
    pub y_sampled: ArrayView1<'a, f64>,
    /// `(n2, nvar)`, intercept first.
    pub x_nonsampled: ArrayView2<'a, f64>,
}

impl<'a> From<&'a Partition> for ModelData<'a> {
    fn from(partition: &'a Partition) -> Self {
        Self {
            x_sampled: partition.x_sampled.view(),
            y_sampled: partition.y_sampled.view(),
            x_nonsampled: partition.x_nonsampled.view(),
        }
    }
}

/// Chain starting point. Random effects start at zero and dispersion nodes at one.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialValues {
    pub b: Vec<f64>,
    pub g: Vec<f64>,
    pub tau_u: f64,
    pub tau_v: f64,
}

impl InitialValues {
    /// Coefficients start at the current prior means, precisions at the configured values.
    pub fn new(hyper: &HyperParameters, config: &EstimationConfig) -> Self {
        Self {
            b: hyper.mu_b.clone(),
            g: hyper.mu_g.clone(),
            tau_u: config.tau_u,
            tau_v: config.tau_v,
        }
    }
}

/// Everything one sampler invocation needs.
#[derive(Debug, Clone, Copy)]
pub struct SamplingRequest<'a> {
    pub spec: &'a ModelSpec,
    pub data: ModelData<'a>,
    pub inits: &'a InitialValues,
    pub schedule: McmcSchedule,
}

/// A posterior sampling engine.
///
/// Implementations must report every node in `request.spec.monitors`. Failures are returned as
/// [`ZinbError::Sampling`]; the caller does not retry.
pub trait PosteriorSampler {
    /// Run the engine once and summarise the retained draws.
    ///
    /// # Errors
    /// [`ZinbError::Sampling`] when the engine cannot build or run the model.
    fn sample(&mut self, request: &SamplingRequest<'_>) -> Result<PosteriorSummary, ZinbError>;
}

impl<S: PosteriorSampler + ?Sized> PosteriorSampler for &mut S {
    fn sample(&mut self, request: &SamplingRequest<'_>) -> Result<PosteriorSummary, ZinbError> {
        (**self).sample(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, array};

    #[test]
    fn node_names_are_one_based() {
        assert_eq!(Node::B(0).to_string(), "b[1]");
        assert_eq!(Node::MuEffNonsampled(2).to_string(), "mu_eff_nonsampled[3]");
        assert_eq!(Node::VarU.to_string(), "a.var.u");
        assert_eq!(Node::TauPb.to_string(), "tau.pb");
    }

    #[test]
    fn summary_of_draws() {
        let draws = Array1::from_iter((1..=5).map(f64::from));
        let s = NodeSummary::from_draws(draws.view());
        assert_relative_eq!(s.mean, 3.0);
        assert_relative_eq!(s.sd, 2.5f64.sqrt());
        assert_relative_eq!(s.quantiles[2], 3.0);
        assert!(s.quantiles.windows(2).all(|w| w[0] <= w[1]));
        assert!(s.quantiles[0] >= 1.0 && s.quantiles[4] <= 5.0);
    }

    #[test]
    fn moment_summary_is_symmetric() {
        let s = NodeSummary::from_moments(2.0, 0.5);
        assert_relative_eq!(s.quantiles[2], 2.0, epsilon = 1e-9);
        assert_relative_eq!(s.quantiles[4] - 2.0, 2.0 - s.quantiles[0], epsilon = 1e-9);
        assert_eq!(NodeSummary::from_moments(1.0, 0.0).quantiles, [1.0; 5]);
    }

    #[test]
    fn lookup_is_by_node_not_position() {
        let summary = PosteriorSummary::new(
            vec![Node::TauU, Node::B(0)],
            vec![
                NodeSummary::from_moments(3.0, 1.0),
                NodeSummary::from_moments(-1.0, 0.1),
            ],
        )
        .unwrap();
        assert_eq!(summary.get(Node::B(0)).unwrap().mean, -1.0);
        assert!(summary.get(Node::G(0)).is_none());
        assert!(matches!(
            summary.ensure_monitors(&[Node::TauU, Node::G(0)]),
            Err(ZinbError::Sampling(msg)) if msg.contains("g[1]")
        ));
    }

    #[test]
    fn duplicate_nodes_are_rejected() {
        let stats = vec![NodeSummary::from_moments(0.0, 1.0); 2];
        assert!(PosteriorSummary::new(vec![Node::TauU, Node::TauU], stats).is_err());
    }

    #[test]
    fn non_finite_draws_fail() {
        let draws =
            PosteriorDraws::new(vec![Node::TauU, Node::TauV], array![[1.0, 2.0], [f64::NAN, 1.0]])
                .unwrap();
        assert!(matches!(
            PosteriorSummary::from_draws(draws),
            Err(ZinbError::Sampling(msg)) if msg.contains("tau.u")
        ));
    }

    #[test]
    fn draws_are_kept_with_the_summary() {
        let draws =
            PosteriorDraws::new(vec![Node::TauU], array![[1.0], [2.0], [3.0]]).unwrap();
        let summary = PosteriorSummary::from_draws(draws).unwrap();
        assert_relative_eq!(summary.get(Node::TauU).unwrap().mean, 2.0);
        assert_eq!(
            summary.draws().unwrap().get_posterior_samples(Node::TauU),
            Some(vec![1.0, 2.0, 3.0])
        );
    }
}
