//! Area data and the sampled/non-sampled split.
//!
//! The sampler needs the observed areas and the prediction-only areas as two separately sized
//! blocks, while results are reported in the original area order. [`partition`] builds both
//! blocks together with the slot map used to put them back together.

use ndarray::{Array1, Array2, Axis, concatenate};

use crate::error::ZinbError;

/// One outcome and one covariate row per area.
///
/// Missing covariates are encoded as `NaN`; a missing outcome is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaData {
    pub outcome: Vec<Option<u64>>,
    /// Covariates without intercept, shape `(n_areas, n_covariates)`.
    pub covariates: Array2<f64>,
}

impl AreaData {
    pub fn new(outcome: Vec<Option<u64>>, covariates: Array2<f64>) -> Self {
        Self {
            outcome,
            covariates,
        }
    }

    pub fn n_areas(&self) -> usize {
        self.outcome.len()
    }

    /// Coefficients per sub-model: one per covariate plus the intercept.
    pub fn nvar(&self) -> usize {
        self.covariates.ncols() + 1
    }
}

/// Whether any outcome was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SamplingMode {
    FullySampled,
    Mixed,
}

/// Where an original area lives after partitioning: its block and local position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaSlot {
    Sampled(usize),
    NonSampled(usize),
}

/// Areas split into the observed block and the prediction-only block.
#[derive(Debug, Clone)]
pub struct Partition {
    mode: SamplingMode,
    slots: Vec<AreaSlot>,
    /// Design of the sampled areas with a leading intercept column, `(n1, nvar)`.
    pub x_sampled: Array2<f64>,
    /// Observed counts of the sampled areas, `(n1,)`.
    pub y_sampled: Array1<f64>,
    /// Design of the non-sampled areas with a leading intercept column, `(n2, nvar)`.
    pub x_nonsampled: Array2<f64>,
}

impl Partition {
    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    pub fn n_areas(&self) -> usize {
        self.slots.len()
    }

    pub fn n_sampled(&self) -> usize {
        self.x_sampled.nrows()
    }

    pub fn n_nonsampled(&self) -> usize {
        self.x_nonsampled.nrows()
    }

    pub fn nvar(&self) -> usize {
        self.x_sampled.ncols()
    }

    /// Block and local position of original area `area`.
    ///
    /// # Panics
    /// Panics if `area` is out of range.
    pub fn slot(&self, area: usize) -> AreaSlot {
        self.slots[area]
    }

    pub fn slots(&self) -> &[AreaSlot] {
        &self.slots
    }
}

/// Split `data` into sampled and non-sampled blocks, keeping the original order inside each.
///
/// # Errors
/// [`ZinbError::InvalidInput`] if the covariates contain missing values, the outcome and
/// covariates disagree in length, there are no areas, or no outcome is observed.
pub fn partition(data: &AreaData) -> Result<Partition, ZinbError> {
    let n = data.n_areas();
    if n == 0 {
        return Err(ZinbError::invalid_input("no areas supplied"));
    }
    if data.covariates.nrows() != n {
        return Err(ZinbError::invalid_input(format!(
            "outcome has {n} rows but covariates have {}",
            data.covariates.nrows()
        )));
    }
    if data.covariates.iter().any(|x| !x.is_finite()) {
        return Err(ZinbError::invalid_input(
            "auxiliary variables contain missing values",
        ));
    }

    let mut sampled = Vec::new();
    let mut nonsampled = Vec::new();
    let mut slots = Vec::with_capacity(n);
    for (area, y) in data.outcome.iter().enumerate() {
        match y {
            Some(_) => {
                slots.push(AreaSlot::Sampled(sampled.len()));
                sampled.push(area);
            }
            None => {
                slots.push(AreaSlot::NonSampled(nonsampled.len()));
                nonsampled.push(area);
            }
        }
    }
    if sampled.is_empty() {
        return Err(ZinbError::invalid_input(
            "every outcome is missing, at least one sampled area is required",
        ));
    }

    let design = with_intercept(&data.covariates);
    let y_sampled = sampled
        .iter()
        .filter_map(|&area| data.outcome[area])
        .map(|y| y as f64)
        .collect::<Array1<f64>>();

    Ok(Partition {
        mode: if nonsampled.is_empty() {
            SamplingMode::FullySampled
        } else {
            SamplingMode::Mixed
        },
        slots,
        x_sampled: design.select(Axis(0), &sampled),
        y_sampled,
        x_nonsampled: design.select(Axis(0), &nonsampled),
    })
}

fn with_intercept(covariates: &Array2<f64>) -> Array2<f64> {
    let ones = Array2::<f64>::ones((covariates.nrows(), 1));
    concatenate![Axis(1), ones, covariates.view()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn fully_sampled_when_no_outcome_is_missing() {
        let data = AreaData::new(
            vec![Some(0), Some(3), Some(1)],
            array![[0.1, 1.0], [0.2, 2.0], [0.3, 3.0]],
        );
        let part = partition(&data).unwrap();
        assert_eq!(part.mode(), SamplingMode::FullySampled);
        assert_eq!(part.nvar(), 3);
        assert_eq!(part.n_nonsampled(), 0);
        assert_eq!(part.x_sampled.column(0).to_vec(), vec![1.0; 3]);
        assert_eq!(part.y_sampled.to_vec(), vec![0.0, 3.0, 1.0]);
    }

    #[test]
    fn mixed_mode_keeps_a_slot_map() {
        let data = AreaData::new(
            vec![Some(2), None, Some(5), None],
            array![[1.0], [2.0], [3.0], [4.0]],
        );
        let part = partition(&data).unwrap();
        assert_eq!(part.mode(), SamplingMode::Mixed);
        assert_eq!(
            part.slots(),
            &[
                AreaSlot::Sampled(0),
                AreaSlot::NonSampled(0),
                AreaSlot::Sampled(1),
                AreaSlot::NonSampled(1)
            ]
        );
        assert_eq!(part.x_nonsampled, array![[1.0, 2.0], [1.0, 4.0]]);
        assert_eq!(part.y_sampled.to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn missing_covariate_is_rejected() {
        let data = AreaData::new(vec![Some(1), Some(2)], array![[1.0], [f64::NAN]]);
        let err = partition(&data).unwrap_err();
        assert_eq!(
            err,
            ZinbError::InvalidInput("auxiliary variables contain missing values".into())
        );
    }

    #[test]
    fn all_missing_outcomes_are_rejected() {
        let data = AreaData::new(vec![None, None], array![[1.0], [2.0]]);
        assert!(matches!(
            partition(&data),
            Err(ZinbError::InvalidInput(_))
        ));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let data = AreaData::new(vec![Some(1)], array![[1.0], [2.0]]);
        assert!(matches!(
            partition(&data),
            Err(ZinbError::InvalidInput(_))
        ));
    }

    proptest! {
        #[test]
        fn slot_map_is_a_bijection(observed in proptest::collection::vec(any::<bool>(), 1..40)) {
            prop_assume!(observed.iter().any(|&o| o));
            let n = observed.len();
            let outcome = observed.iter().map(|&o| o.then_some(1)).collect::<Vec<_>>();
            let covariates = Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f64);
            let part = partition(&AreaData::new(outcome, covariates)).unwrap();

            prop_assert_eq!(part.n_sampled() + part.n_nonsampled(), n);
            let mut seen_s = vec![false; part.n_sampled()];
            let mut seen_ns = vec![false; part.n_nonsampled()];
            for (area, slot) in part.slots().iter().enumerate() {
                match *slot {
                    AreaSlot::Sampled(k) => {
                        prop_assert!(observed[area]);
                        prop_assert_eq!(part.x_sampled[(k, 1)], (area * 2) as f64);
                        seen_s[k] = true;
                    }
                    AreaSlot::NonSampled(k) => {
                        prop_assert!(!observed[area]);
                        prop_assert_eq!(part.x_nonsampled[(k, 1)], (area * 2) as f64);
                        seen_ns[k] = true;
                    }
                }
            }
            prop_assert!(seen_s.into_iter().all(|s| s));
            prop_assert!(seen_ns.into_iter().all(|s| s));
        }
    }
}
