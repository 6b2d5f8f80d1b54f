//! The empirical-Bayes refinement loop.

use crate::area::{AreaData, partition};
use crate::config::EstimationConfig;
use crate::error::ZinbError;
use crate::hyper::HyperParameters;
use crate::model::ModelSpec;
use crate::result::{EstimationResult, assemble};
use crate::sampler::{InitialValues, ModelData, PosteriorSampler, PosteriorSummary, SamplingRequest};

/// Outcome of [`ZinbEstimator::fit`].
#[derive(Debug, Clone)]
pub struct Estimation {
    pub result: EstimationResult,
    /// Hyperparameters the final iteration was run under.
    pub priors: HyperParameters,
}

/// Hierarchical Bayesian ZINB small-area estimator.
///
/// Each fit runs exactly `iter_update` rounds of model building, sampling and moment matching.
/// There is no convergence check; more rounds pull the priors closer to the data.
///
/// The estimator owns its sampler and shares no state between fits.
pub struct ZinbEstimator<S> {
    config: EstimationConfig,
    sampler: S,
}

impl<S: PosteriorSampler> ZinbEstimator<S> {
    pub fn new(config: EstimationConfig, sampler: S) -> Self {
        Self { config, sampler }
    }

    pub fn config(&self) -> &EstimationConfig {
        &self.config
    }

    pub fn into_sampler(self) -> S {
        self.sampler
    }

    /// Estimate area means, coefficients and random-effect variances for `data`.
    ///
    /// # Errors
    /// - [`ZinbError::Config`] for invalid settings, before any sampling.
    /// - [`ZinbError::InvalidInput`] for missing covariates or an unusable outcome vector.
    /// - [`ZinbError::Sampling`] when the sampler fails or reports an unusable posterior.
    pub fn fit(&mut self, data: &AreaData) -> Result<Estimation, ZinbError> {
        let nvar = data.nvar();
        self.config.validate(nvar)?;
        let partition = partition(data)?;
        tracing::info!(
            areas = partition.n_areas(),
            sampled = partition.n_sampled(),
            nonsampled = partition.n_nonsampled(),
            nvar,
            iterations = self.config.iter_update,
            "starting ZINB small-area estimation"
        );

        let mut hyper = HyperParameters::initial(&self.config, nvar);
        let mut last: Option<(PosteriorSummary, HyperParameters)> = None;
        for iteration in 1..=self.config.iter_update {
            let posterior = self.run_iteration(&hyper, &partition, iteration)?;
            if iteration < self.config.iter_update {
                hyper.refine(&posterior)?;
            } else {
                last = Some((posterior, hyper.clone()));
            }
        }

        let (posterior, priors) =
            last.ok_or_else(|| ZinbError::sampling("refinement loop produced no posterior"))?;
        let result = assemble(posterior, &partition)?;
        tracing::info!(areas = result.estimates.len(), "estimation finished");
        Ok(Estimation { result, priors })
    }

    /// Build the model for `hyper`, sample it once and check every monitored node came back.
    /// The model description lives only for the duration of this call.
    fn run_iteration(
        &mut self,
        hyper: &HyperParameters,
        partition: &crate::area::Partition,
        iteration: usize,
    ) -> Result<PosteriorSummary, ZinbError> {
        let spec = ModelSpec::build(hyper, partition);
        tracing::debug!(iteration, model = %spec, "model specification");

        let inits = InitialValues::new(hyper, &self.config);
        let request = SamplingRequest {
            spec: &spec,
            data: ModelData::from(partition),
            inits: &inits,
            schedule: self.config.schedule(),
        };
        let posterior = self.sampler.sample(&request)?;
        posterior.ensure_monitors(&spec.monitors)?;
        tracing::info!(
            iteration,
            of = self.config.iter_update,
            monitored = spec.monitors.len(),
            "refinement iteration sampled"
        );
        Ok(posterior)
    }
}
