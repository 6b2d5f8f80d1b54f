//! End-to-end behaviour of the refinement loop against a scripted sampler.

use approx::assert_relative_eq;
use ndarray::{Array2, array};
use sae_zinb::{
    AreaData, ConfigError, EstimationConfig, GammaPrior, Node, NodeSummary, PosteriorSampler,
    PosteriorSummary, SamplingRequest, ZinbError, ZinbEstimator,
};

/// Answers each call from a fixed function of `(call, node)` and records what it was asked.
struct Scripted<F> {
    answer: F,
    calls: usize,
    monitor_counts: Vec<usize>,
    b_priors: Vec<Vec<(f64, f64)>>,
    tau_pa_priors: Vec<GammaPrior>,
}

impl<F: Fn(usize, Node) -> NodeSummary> Scripted<F> {
    fn new(answer: F) -> Self {
        Self {
            answer,
            calls: 0,
            monitor_counts: Vec::new(),
            b_priors: Vec::new(),
            tau_pa_priors: Vec::new(),
        }
    }
}

impl<F: Fn(usize, Node) -> NodeSummary> PosteriorSampler for Scripted<F> {
    fn sample(&mut self, request: &SamplingRequest<'_>) -> Result<PosteriorSummary, ZinbError> {
        self.calls += 1;
        let spec = request.spec;
        self.monitor_counts.push(spec.monitors.len());
        self.b_priors
            .push(spec.b.iter().map(|p| (p.mean, p.precision)).collect());
        self.tau_pa_priors.push(spec.tau_pa);

        let stats = spec
            .monitors
            .iter()
            .map(|&node| (self.answer)(self.calls, node))
            .collect();
        PosteriorSummary::new(spec.monitors.clone(), stats)
    }
}

fn unit(_: usize, node: Node) -> NodeSummary {
    match node {
        Node::MuEff(i) => NodeSummary::from_moments(i as f64, 0.5),
        Node::MuEffNonsampled(j) => NodeSummary::from_moments(1_000.0 + j as f64, 0.5),
        _ => NodeSummary::from_moments(1.0, 1.0),
    }
}

fn covariates(n: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, cols), |(i, j)| (i + 1) as f64 * 0.1 + j as f64)
}

#[test]
fn too_few_refinement_iterations_never_reach_the_sampler() {
    let mut sampler = Scripted::new(unit);
    let data = AreaData::new(vec![Some(1); 4], covariates(4, 1));
    let err = ZinbEstimator::new(EstimationConfig::default().with_iter_update(2), &mut sampler)
        .fit(&data)
        .unwrap_err();

    assert_eq!(err, ZinbError::Config(ConfigError::TooFewIterations(2)));
    assert_eq!(sampler.calls, 0);
}

#[test]
fn fully_sampled_areas_keep_their_order() {
    let mut sampler = Scripted::new(unit);
    let outcome = (0..10).map(|i| Some(i % 3)).collect();
    let data = AreaData::new(outcome, covariates(10, 2));
    let estimation = ZinbEstimator::new(EstimationConfig::default(), &mut sampler)
        .fit(&data)
        .unwrap();

    let estimates = &estimation.result.estimates;
    assert_eq!(estimates.len(), 10);
    assert_eq!(estimates.labels()[0], "1");
    assert_eq!(estimates.labels()[9], "10");
    assert_eq!(
        estimates.column("mean").unwrap(),
        (0..10).map(|i| i as f64).collect::<Vec<_>>()
    );
    assert_eq!(sampler.calls, 3);
}

#[test]
fn non_sampled_areas_are_put_back_in_place() {
    let mut sampler = Scripted::new(unit);
    let outcome = vec![
        Some(2),
        None,
        Some(0),
        Some(5),
        None,
        Some(1),
        Some(0),
        None,
        Some(3),
        Some(0),
    ];
    let data = AreaData::new(outcome, covariates(10, 1));
    let estimation = ZinbEstimator::new(EstimationConfig::default(), &mut sampler)
        .fit(&data)
        .unwrap();

    assert_eq!(
        estimation.result.estimates.column("mean").unwrap(),
        vec![0.0, 1_000.0, 1.0, 2.0, 1_001.0, 3.0, 4.0, 1_002.0, 5.0, 6.0]
    );
    // 2 variances, 2x2 coefficients, 7 + 3 area means, 4 precision nodes
    assert!(sampler.monitor_counts.iter().all(|&n| n == 2 + 4 + 10 + 4));
}

#[test]
fn priors_follow_the_moments_of_the_previous_posterior() {
    let answer = |call: usize, node: Node| match node {
        Node::B(k) => NodeSummary::from_moments(call as f64 + k as f64, 0.5),
        Node::TauPa => NodeSummary::from_moments(2.0 * call as f64, 1.0),
        Node::MuEff(i) => NodeSummary::from_moments(10.0 * call as f64 + i as f64, 1.0),
        _ => NodeSummary::from_moments(1.0, 1.0),
    };
    let mut sampler = Scripted::new(answer);
    let data = AreaData::new(
        vec![Some(0), Some(3), Some(1), Some(0), Some(7)],
        array![
            [0.2, 1.0],
            [0.4, 0.0],
            [0.1, 1.0],
            [0.9, 0.0],
            [0.5, 1.0]
        ],
    );
    let config = EstimationConfig::default().with_var_coef_nonzero(vec![4.0, 4.0, 4.0]);
    let estimation = ZinbEstimator::new(config, &mut sampler).fit(&data).unwrap();

    assert_eq!(sampler.calls, 3);
    assert_eq!(sampler.b_priors[0], vec![(0.0, 0.25); 3]);
    assert_eq!(sampler.b_priors[1], vec![(1.0, 4.0), (2.0, 4.0), (3.0, 4.0)]);
    assert_eq!(sampler.b_priors[2], vec![(2.0, 4.0), (3.0, 4.0), (4.0, 4.0)]);

    assert_eq!(sampler.tau_pa_priors[0], GammaPrior::new(1.0, 1.0));
    // mean 2, sd 1 -> shape 4, rate 2
    assert_eq!(sampler.tau_pa_priors[1], GammaPrior::new(4.0, 2.0));
    assert_eq!(sampler.tau_pa_priors[2], GammaPrior::new(16.0, 4.0));
    assert_eq!(estimation.priors.tau_pa, GammaPrior::new(16.0, 4.0));

    let table = &estimation.result.estimates;
    assert_eq!(table.column("mean").unwrap(), vec![30.0, 31.0, 32.0, 33.0, 34.0]);
    let row = table.get("2").unwrap().row();
    assert_eq!(row.len(), 7);
    assert_relative_eq!(row[4], 31.0, epsilon = 1e-9);
    assert!(row[2] < row[3] && row[3] < row[4] && row[4] < row[5] && row[5] < row[6]);

    assert_eq!(
        estimation.result.coefficients.labels(),
        &["b[0]", "b[1]", "b[2]", "g[0]", "g[1]", "g[2]"]
    );
    assert_eq!(estimation.result.coefficients.get("b[2]").unwrap().mean, 5.0);
}

#[test]
fn tiny_posterior_sd_gives_a_huge_precision() {
    let eps = 1e-4;
    let answer = move |_: usize, node: Node| match node {
        Node::G(_) => NodeSummary::from_moments(-0.5, eps),
        _ => NodeSummary::from_moments(1.0, 1.0),
    };
    let mut sampler = Scripted::new(answer);
    let data = AreaData::new(vec![Some(0), Some(2), Some(1)], covariates(3, 1));
    let estimation = ZinbEstimator::new(EstimationConfig::default(), &mut sampler)
        .fit(&data)
        .unwrap();

    for &tau in &estimation.priors.tau_g {
        assert_relative_eq!(tau, 1.0 / (eps * eps), max_relative = 1e-9);
    }
    assert_eq!(estimation.priors.mu_g, vec![-0.5, -0.5]);
    assert_eq!(estimation.priors.tau_b.len(), 2);
}

#[test]
fn sampler_failure_aborts_without_a_result() {
    struct FailsSecond(usize);
    impl PosteriorSampler for FailsSecond {
        fn sample(
            &mut self,
            request: &SamplingRequest<'_>,
        ) -> Result<PosteriorSummary, ZinbError> {
            self.0 += 1;
            if self.0 == 2 {
                return Err(ZinbError::Sampling("chain diverged".into()));
            }
            let stats = vec![NodeSummary::from_moments(1.0, 1.0); request.spec.monitors.len()];
            PosteriorSummary::new(request.spec.monitors.clone(), stats)
        }
    }

    let mut sampler = FailsSecond(0);
    let data = AreaData::new(vec![Some(0), Some(2), Some(1)], covariates(3, 1));
    let err = ZinbEstimator::new(EstimationConfig::default(), &mut sampler)
        .fit(&data)
        .unwrap_err();
    assert_eq!(err, ZinbError::Sampling("chain diverged".into()));
    assert_eq!(sampler.0, 2);
}

#[test]
fn missing_covariate_is_rejected_before_sampling() {
    let mut sampler = Scripted::new(unit);
    let data = AreaData::new(
        vec![Some(0), Some(2), Some(1)],
        array![[0.1], [f64::NAN], [0.3]],
    );
    let err = ZinbEstimator::new(EstimationConfig::default(), &mut sampler)
        .fit(&data)
        .unwrap_err();
    assert!(matches!(err, ZinbError::InvalidInput(msg) if msg.contains("missing values")));
    assert_eq!(sampler.calls, 0);
}

#[test]
fn coefficient_vector_of_wrong_length_is_a_config_error() {
    let mut sampler = Scripted::new(unit);
    let data = AreaData::new(vec![Some(0), Some(2)], covariates(2, 2));
    let config = EstimationConfig::default().with_coef_zero(vec![0.0, 1.0]);
    let err = ZinbEstimator::new(config, &mut sampler).fit(&data).unwrap_err();
    assert!(matches!(
        err,
        ZinbError::Config(ConfigError::CoefficientLength { len: 2, nvar: 3, .. })
    ));
    assert_eq!(sampler.calls, 0);
}
