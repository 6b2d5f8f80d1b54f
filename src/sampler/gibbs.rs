//! Metropolis-within-Gibbs engine for the ZINB small-area model.
//!
//! The [`ModelSpec`] is lowered into a `mini_mcmc` [`Conditional`] over the state
//!
//! ```text
//! [ b(nvar) | g(nvar) | u(n1) | v(n1) | phi(n1) | u.ns(n2) | v.ns(n2) | tau.u | tau.v | tau.pa | tau.pb ]
//! ```
//!
//! Updates per coordinate:
//! - `tau.u`, `tau.v`, `tau.pb`: conjugate Gamma draws
//! - `u.ns`, `v.ns`: direct draws from `N(0, 1/tau)` (no likelihood)
//! - `phi`, `tau.pa`: random-walk Metropolis on the log scale
//! - `b`, `g`, `u`, `v`: random-walk Metropolis
//!
//! Proposal scales are tuned in batches of [`ADAPT_BATCH`] sweeps during the adaptation phase and
//! frozen afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mini_mcmc::core::{ChainRunner, init_det};
use mini_mcmc::distributions::Conditional;
use mini_mcmc::gibbs::GibbsSampler;
use ndarray::{Array1, Array2, ArrayView1, s};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{Gamma, Normal};
use statrs::function::gamma::ln_gamma;

use super::{Node, PosteriorDraws, PosteriorSampler, PosteriorSummary, SamplingRequest};
use crate::error::ZinbError;
use crate::hyper::GammaPrior;
use crate::model::{ModelSpec, NormalPrior, Variant};

const ADAPT_BATCH: usize = 50;
const TARGET_ACCEPT: f64 = 0.44;
const INITIAL_LOG_STEP: f64 = -1.0;

/// Gibbs sampling backend built on [`mini_mcmc::gibbs::GibbsSampler`].
///
/// Every call uses a fresh seed derived from the schedule seed and the number of previous calls,
/// so successive refinement iterations do not replay the same random stream.
///
/// # Example
/// ```no_run
/// use ndarray::array;
/// use sae_zinb::{AreaData, EstimationConfig, GibbsZinb, ZinbEstimator};
///
/// let data = AreaData::new(
///     vec![Some(0), Some(3), None, Some(7), Some(0)],
///     array![[0.1], [0.5], [0.9], [1.3], [0.2]],
/// );
/// let mut estimator = ZinbEstimator::new(EstimationConfig::default(), GibbsZinb::new());
/// let estimation = estimator.fit(&data).expect("estimation failed");
/// estimation.result.summary();
/// ```
#[derive(Debug, Clone, Default)]
pub struct GibbsZinb {
    calls: u64,
}

impl GibbsZinb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PosteriorSampler for GibbsZinb {
    fn sample(&mut self, request: &SamplingRequest<'_>) -> Result<PosteriorSummary, ZinbError> {
        let schedule = request.schedule;
        let seed = schedule.seed.wrapping_add(self.calls);
        self.calls += 1;

        let cond = ZinbConditional::lower(request, seed)?;
        let layout = cond.layout;

        let init = layout.initial_states(schedule.n_chains, request);
        let mut gibbs = GibbsSampler::new(cond.clone(), init).set_seed(seed);
        let (all_samples, run_stats) = gibbs
            .run_progress(schedule.post_burn_in(), schedule.n_adapt + schedule.burn_in)
            .map_err(|e| ZinbError::sampling(format!("gibbs engine failed: {e}")))?;
        tracing::debug!(%run_stats, seed, "gibbs run finished");

        let kept = all_samples.slice(s![.., ..;schedule.thin, ..]);
        let monitors = &request.spec.monitors;
        let n_draws = kept.shape()[0] * kept.shape()[1];
        let mut values = Array2::<f64>::zeros((n_draws, monitors.len()));
        let states = kept
            .outer_iter()
            .flat_map(|chain| chain.outer_iter().map(|row| row.to_vec()).collect::<Vec<_>>());
        for (mut out, state) in values.outer_iter_mut().zip(states) {
            for (slot, &node) in out.iter_mut().zip(monitors) {
                *slot = cond.node_value(node, &state);
            }
        }

        PosteriorSummary::from_draws(PosteriorDraws::new(monitors.clone(), values)?)
    }
}

/// Offsets of each block inside the flat Gibbs state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    nvar: usize,
    n1: usize,
    n2: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coord {
    B(usize),
    G(usize),
    U(usize),
    V(usize),
    Phi(usize),
    UNs(usize),
    VNs(usize),
    TauU,
    TauV,
    TauPa,
    TauPb,
}

impl Layout {
    fn g(&self) -> usize {
        self.nvar
    }
    fn u(&self) -> usize {
        2 * self.nvar
    }
    fn v(&self) -> usize {
        self.u() + self.n1
    }
    fn phi(&self) -> usize {
        self.v() + self.n1
    }
    fn u_ns(&self) -> usize {
        self.phi() + self.n1
    }
    fn v_ns(&self) -> usize {
        self.u_ns() + self.n2
    }
    fn tau_u(&self) -> usize {
        self.v_ns() + self.n2
    }
    fn tau_v(&self) -> usize {
        self.tau_u() + 1
    }
    fn tau_pa(&self) -> usize {
        self.tau_u() + 2
    }
    fn tau_pb(&self) -> usize {
        self.tau_u() + 3
    }
    fn dim(&self) -> usize {
        self.tau_u() + 4
    }

    fn coord(&self, i: usize) -> Coord {
        match i {
            i if i < self.g() => Coord::B(i),
            i if i < self.u() => Coord::G(i - self.g()),
            i if i < self.v() => Coord::U(i - self.u()),
            i if i < self.phi() => Coord::V(i - self.v()),
            i if i < self.u_ns() => Coord::Phi(i - self.phi()),
            i if i < self.v_ns() => Coord::UNs(i - self.u_ns()),
            i if i < self.tau_u() => Coord::VNs(i - self.v_ns()),
            i if i == self.tau_u() => Coord::TauU,
            i if i == self.tau_v() => Coord::TauV,
            i if i == self.tau_pa() => Coord::TauPa,
            _ => Coord::TauPb,
        }
    }

    /// One identical starting state per chain.
    fn initial_states(&self, n_chains: usize, request: &SamplingRequest<'_>) -> Vec<Vec<f64>> {
        let mut init: Vec<Vec<f64>> = init_det(n_chains, self.dim());
        for state in &mut init {
            self.fill_initial(state, request);
        }
        init
    }

    /// Coefficients at their initial values, random effects at zero, dispersion nodes at one.
    /// Every slot is overwritten.
    fn fill_initial(&self, state: &mut [f64], request: &SamplingRequest<'_>) {
        state[..self.nvar].copy_from_slice(&request.inits.b);
        state[self.g()..self.u()].copy_from_slice(&request.inits.g);
        state[self.u()..self.phi()].fill(0.0);
        state[self.phi()..self.u_ns()].fill(1.0);
        state[self.u_ns()..self.tau_u()].fill(0.0);
        state[self.tau_u()] = request.inits.tau_u;
        state[self.tau_v()] = request.inits.tau_v;
        state[self.tau_pa()] = 1.0;
        state[self.tau_pb()] = 1.0;
    }
}

/// Full conditionals of the ZINB model for one chain.
struct ZinbConditional {
    layout: Layout,
    x: Array2<f64>,
    y: Array1<f64>,
    x_ns: Array2<f64>,
    plug_in_b: Vec<f64>,
    plug_in_g: Vec<f64>,
    b_prior: Vec<NormalPrior>,
    g_prior: Vec<NormalPrior>,
    tau_u_prior: GammaPrior,
    tau_v_prior: GammaPrior,
    tau_pa_prior: GammaPrior,
    tau_pb_prior: GammaPrior,
    /// Log proposal scale per coordinate.
    log_step: Vec<f64>,
    accepted: Vec<u32>,
    proposed: Vec<u32>,
    sweep: usize,
    n_adapt: usize,
    seed: u64,
    streams: Arc<AtomicU64>,
    rng: ChaCha8Rng,
}

impl Clone for ZinbConditional {
    /// Each clone (one per chain) draws from its own ChaCha stream.
    fn clone(&self) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(self.streams.fetch_add(1, Ordering::Relaxed));
        Self {
            layout: self.layout,
            x: self.x.clone(),
            y: self.y.clone(),
            x_ns: self.x_ns.clone(),
            plug_in_b: self.plug_in_b.clone(),
            plug_in_g: self.plug_in_g.clone(),
            b_prior: self.b_prior.clone(),
            g_prior: self.g_prior.clone(),
            tau_u_prior: self.tau_u_prior,
            tau_v_prior: self.tau_v_prior,
            tau_pa_prior: self.tau_pa_prior,
            tau_pb_prior: self.tau_pb_prior,
            log_step: self.log_step.clone(),
            accepted: self.accepted.clone(),
            proposed: self.proposed.clone(),
            sweep: self.sweep,
            n_adapt: self.n_adapt,
            seed: self.seed,
            streams: Arc::clone(&self.streams),
            rng,
        }
    }
}

impl ZinbConditional {
    /// Check the request for consistency and build the conditional sampler from it.
    fn lower(request: &SamplingRequest<'_>, seed: u64) -> Result<Self, ZinbError> {
        let spec: &ModelSpec = request.spec;
        let data = request.data;
        let layout = Layout {
            nvar: spec.nvar,
            n1: spec.n_sampled(),
            n2: spec.n_nonsampled(),
        };

        let shape_ok = data.x_sampled.dim() == (layout.n1, layout.nvar)
            && data.y_sampled.len() == layout.n1
            && data.x_nonsampled.nrows() == layout.n2
            && (layout.n2 == 0 || data.x_nonsampled.ncols() == layout.nvar)
            && spec.b.len() == layout.nvar
            && spec.g.len() == layout.nvar
            && request.inits.b.len() == layout.nvar
            && request.inits.g.len() == layout.nvar;
        if !shape_ok {
            return Err(ZinbError::sampling(format!(
                "data bindings do not match the model (nvar = {}, n1 = {}, n2 = {})",
                layout.nvar, layout.n1, layout.n2
            )));
        }

        let (plug_in_b, plug_in_g) = match &spec.variant {
            Variant::FullySampled { .. } => (Vec::new(), Vec::new()),
            Variant::Mixed {
                plug_in_b,
                plug_in_g,
                ..
            } => (plug_in_b.clone(), plug_in_g.clone()),
        };

        let dim = layout.dim();
        Ok(Self {
            layout,
            x: data.x_sampled.to_owned(),
            y: data.y_sampled.to_owned(),
            x_ns: data.x_nonsampled.to_owned(),
            plug_in_b,
            plug_in_g,
            b_prior: spec.b.clone(),
            g_prior: spec.g.clone(),
            tau_u_prior: spec.tau_u,
            tau_v_prior: spec.tau_v,
            tau_pa_prior: spec.tau_pa,
            tau_pb_prior: spec.tau_pb,
            log_step: vec![INITIAL_LOG_STEP; dim],
            accepted: vec![0; dim],
            proposed: vec![0; dim],
            sweep: 0,
            n_adapt: request.schedule.n_adapt,
            seed,
            streams: Arc::new(AtomicU64::new(0)),
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    fn eta_mu(&self, i: usize, given: &[f64]) -> f64 {
        dot(self.x.row(i), &given[..self.layout.nvar]) + given[self.layout.u() + i]
    }

    fn eta_pi(&self, i: usize, given: &[f64]) -> f64 {
        let l = self.layout;
        dot(self.x.row(i), &given[l.g()..l.u()]) + given[l.v() + i]
    }

    fn area_log_lik(&self, i: usize, eta_mu: f64, eta_pi: f64, phi: f64) -> f64 {
        zinb_log_lik(self.y[i], log_mean(eta_mu, eta_pi), phi)
    }

    /// Value of a monitored node in state `given`.
    fn node_value(&self, node: Node, given: &[f64]) -> f64 {
        let l = self.layout;
        match node {
            Node::VarU => 1.0 / given[l.tau_u()],
            Node::VarV => 1.0 / given[l.tau_v()],
            Node::B(k) => given[k],
            Node::G(k) => given[l.g() + k],
            Node::MuEff(i) => log_mean(self.eta_mu(i, given), self.eta_pi(i, given)).exp(),
            Node::MuEffNonsampled(j) => {
                let row = self.x_ns.row(j);
                let eta_mu = dot(row, &self.plug_in_b) + given[l.u_ns() + j];
                let eta_pi = dot(row, &self.plug_in_g) + given[l.v_ns() + j];
                log_mean(eta_mu, eta_pi).exp()
            }
            Node::TauPa => given[l.tau_pa()],
            Node::TauPb => given[l.tau_pb()],
            Node::TauU => given[l.tau_u()],
            Node::TauV => given[l.tau_v()],
        }
    }

    fn std_normal(&mut self) -> f64 {
        self.rng.sample(Normal::standard())
    }

    fn gamma_draw(&mut self, shape: f64, rate: f64) -> f64 {
        match Gamma::new(shape, rate) {
            Ok(gamma) => self.rng.sample(gamma),
            Err(err) => {
                tracing::warn!(shape, rate, %err, "invalid Gamma full conditional");
                f64::NAN
            }
        }
    }

    /// One random-walk Metropolis step for coordinate `i`. `log_post` is evaluated at the current
    /// value and at the proposal; `log_scale` proposes multiplicatively for positive coordinates.
    fn metropolis(
        &mut self,
        i: usize,
        current: f64,
        log_scale: bool,
        log_post: impl Fn(&Self, f64) -> f64,
    ) -> f64 {
        let step = self.log_step[i].exp() * self.std_normal();
        let (proposal, jacobian) = if log_scale {
            (current * step.exp(), step)
        } else {
            (current + step, 0.0)
        };
        let log_alpha = log_post(self, proposal) - log_post(self, current) + jacobian;

        self.proposed[i] += 1;
        let accept = log_alpha >= 0.0 || self.rng.r#gen::<f64>().ln() < log_alpha;
        if accept {
            self.accepted[i] += 1;
            proposal
        } else {
            current
        }
    }

    /// Nudge every proposal scale toward the target acceptance rate and reset the counters.
    fn tune(&mut self) {
        let batch = (self.sweep / ADAPT_BATCH) as f64;
        let delta = (1.0 / batch.sqrt()).min(0.1);
        for ((step, acc), prop) in self
            .log_step
            .iter_mut()
            .zip(self.accepted.iter_mut())
            .zip(self.proposed.iter_mut())
        {
            if *prop > 0 {
                let rate = f64::from(*acc) / f64::from(*prop);
                *step += if rate > TARGET_ACCEPT { delta } else { -delta };
            }
            *acc = 0;
            *prop = 0;
        }
    }

    fn coefficient_step(&mut self, i: usize, k: usize, given: &[f64], intensity: bool) -> f64 {
        let prior = if intensity {
            self.b_prior[k]
        } else {
            self.g_prior[k]
        };
        if prior.precision.is_infinite() {
            return prior.mean;
        }
        let l = self.layout;
        let current = given[i];
        let etas = (0..l.n1)
            .map(|a| (self.eta_mu(a, given), self.eta_pi(a, given), given[l.phi() + a]))
            .collect::<Vec<_>>();
        self.metropolis(i, current, false, |s, value| {
            let shift = value - current;
            let log_lik = etas
                .iter()
                .enumerate()
                .map(|(a, &(eta_mu, eta_pi, phi))| {
                    let xk = s.x[(a, k)];
                    if intensity {
                        s.area_log_lik(a, eta_mu + xk * shift, eta_pi, phi)
                    } else {
                        s.area_log_lik(a, eta_mu, eta_pi + xk * shift, phi)
                    }
                })
                .sum::<f64>();
            -0.5 * prior.precision * (value - prior.mean).powi(2) + log_lik
        })
    }
}

impl Conditional<f64> for ZinbConditional {
    fn sample(&mut self, i: usize, given: &[f64]) -> f64 {
        let l = self.layout;
        if i == 0 {
            if self.sweep > 0 && self.sweep % ADAPT_BATCH == 0 && self.sweep <= self.n_adapt {
                self.tune();
            }
            self.sweep += 1;
        }

        match l.coord(i) {
            Coord::B(k) => self.coefficient_step(i, k, given, true),
            Coord::G(k) => self.coefficient_step(i, k, given, false),
            Coord::U(a) => {
                let eta_mu = self.eta_mu(a, given) - given[i];
                let eta_pi = self.eta_pi(a, given);
                let (phi, tau) = (given[l.phi() + a], given[l.tau_u()]);
                self.metropolis(i, given[i], false, |s, value| {
                    -0.5 * tau * value * value + s.area_log_lik(a, eta_mu + value, eta_pi, phi)
                })
            }
            Coord::V(a) => {
                let eta_mu = self.eta_mu(a, given);
                let eta_pi = self.eta_pi(a, given) - given[i];
                let (phi, tau) = (given[l.phi() + a], given[l.tau_v()]);
                self.metropolis(i, given[i], false, |s, value| {
                    -0.5 * tau * value * value + s.area_log_lik(a, eta_mu, eta_pi + value, phi)
                })
            }
            Coord::Phi(a) => {
                let eta_mu = self.eta_mu(a, given);
                let eta_pi = self.eta_pi(a, given);
                let (shape, rate) = (given[l.tau_pa()], given[l.tau_pb()]);
                self.metropolis(i, given[i], true, |s, value| {
                    if value <= 0.0 {
                        return f64::NEG_INFINITY;
                    }
                    (shape - 1.0) * value.ln() - rate * value
                        + s.area_log_lik(a, eta_mu, eta_pi, value)
                })
            }
            Coord::UNs(_) => self.std_normal() / given[l.tau_u()].sqrt(),
            Coord::VNs(_) => self.std_normal() / given[l.tau_v()].sqrt(),
            Coord::TauU => {
                let ss = sum_sq(&given[l.u()..l.v()]) + sum_sq(&given[l.u_ns()..l.v_ns()]);
                let n = (l.n1 + l.n2) as f64;
                let prior = self.tau_u_prior;
                self.gamma_draw(prior.shape + 0.5 * n, prior.rate + 0.5 * ss)
            }
            Coord::TauV => {
                let ss = sum_sq(&given[l.v()..l.phi()]) + sum_sq(&given[l.v_ns()..l.tau_u()]);
                let n = (l.n1 + l.n2) as f64;
                let prior = self.tau_v_prior;
                self.gamma_draw(prior.shape + 0.5 * n, prior.rate + 0.5 * ss)
            }
            Coord::TauPa => {
                let rate = given[l.tau_pb()];
                let sum_ln_phi = given[l.phi()..l.u_ns()].iter().map(|p| p.ln()).sum::<f64>();
                let n = l.n1 as f64;
                let prior = self.tau_pa_prior;
                self.metropolis(i, given[i], true, |_, shape| {
                    if shape <= 0.0 {
                        return f64::NEG_INFINITY;
                    }
                    (prior.shape - 1.0) * shape.ln() - prior.rate * shape
                        + n * (shape * rate.ln() - ln_gamma(shape))
                        + (shape - 1.0) * sum_ln_phi
                })
            }
            Coord::TauPb => {
                let shape = given[l.tau_pa()];
                let sum_phi = given[l.phi()..l.u_ns()].iter().sum::<f64>();
                let prior = self.tau_pb_prior;
                self.gamma_draw(prior.shape + l.n1 as f64 * shape, prior.rate + sum_phi)
            }
        }
    }
}

fn dot(row: ArrayView1<'_, f64>, coefs: &[f64]) -> f64 {
    row.iter().zip(coefs).map(|(x, c)| x * c).sum()
}

fn sum_sq(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

/// `ln((1 - logistic(eta_pi)) · exp(eta_mu))`
fn log_mean(eta_mu: f64, eta_pi: f64) -> f64 {
    eta_mu - softplus(eta_pi)
}

fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Log-likelihood of count `y` under `NegBin(p, r)` with `p = m·phi/(1 + m·phi)` and
/// `r = m²·phi`, where `m = exp(log_m)` is the zero-inflated area mean.
fn zinb_log_lik(y: f64, log_m: f64, phi: f64) -> f64 {
    let m = log_m.exp();
    let r = m * m * phi;
    if !(m > 0.0 && phi > 0.0 && r > 0.0 && r.is_finite()) {
        return f64::NEG_INFINITY;
    }
    let ln_1p_mphi = (m * phi).ln_1p();
    let ln_p = log_m + phi.ln() - ln_1p_mphi;
    ln_gamma(y + r) - ln_gamma(r) - ln_gamma(y + 1.0) + r * ln_p - y * ln_1p_mphi
}
