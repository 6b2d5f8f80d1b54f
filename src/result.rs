//! Named, area-ordered result tables built from the final posterior.

use serde::{Deserialize, Serialize};

use crate::area::{AreaSlot, Partition};
use crate::error::ZinbError;
use crate::sampler::{Node, NodeSummary, PosteriorDraws, PosteriorSummary};

/// Column names shared by every table.
pub const COLUMNS: [&str; 7] = ["mean", "sd", "2.5%", "25%", "50%", "75%", "97.5%"];

/// Labelled rows of posterior summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    labels: Vec<String>,
    rows: Vec<NodeSummary>,
}

impl Table {
    fn with_capacity(n: usize) -> Self {
        Self {
            labels: Vec::with_capacity(n),
            rows: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, label: String, row: NodeSummary) {
        self.labels.push(label);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn rows(&self) -> &[NodeSummary] {
        &self.rows
    }

    /// Row with the given label.
    pub fn get(&self, label: &str) -> Option<&NodeSummary> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|pos| &self.rows[pos])
    }

    /// All values of one of the [`COLUMNS`], top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let col = COLUMNS.iter().position(|&c| c == name)?;
        Some(self.rows.iter().map(|r| r.row()[col]).collect())
    }

    fn print(&self, title: &str) {
        println!("{title}");
        println!("{}", "=".repeat(title.len()));
        print!("{:<12}", "");
        for name in COLUMNS {
            print!(" {name:>10}");
        }
        println!();
        println!("{}", "-".repeat(12 + 11 * COLUMNS.len()));
        for (label, row) in self.labels.iter().zip(&self.rows) {
            print!("{label:<12}");
            for value in row.row() {
                print!(" {value:>10.4}");
            }
            println!();
        }
    }
}

/// Final output of a fit.
#[derive(Debug, Clone)]
pub struct EstimationResult {
    /// One row per area, in input order, labelled `1..=N`.
    pub estimates: Table,
    /// `b[0]..b[nvar-1]` followed by `g[0]..g[nvar-1]`.
    pub coefficients: Table,
    /// `var.u` and `var.v`.
    pub variances: Table,
    /// Pooled draws of the final iteration, when the sampler kept them.
    pub draws: Option<PosteriorDraws>,
}

impl EstimationResult {
    /// Print the three tables.
    pub fn summary(&self) {
        self.estimates.print("Area estimates");
        println!();
        self.coefficients.print("Coefficients");
        println!();
        self.variances.print("Random-effect variances");
    }
}

/// Reshape the final posterior into result tables.
///
/// Sampled areas read `mu_eff`, non-sampled areas read `mu_eff_nonsampled`; the partition's slot
/// map decides which node feeds each original area.
///
/// # Errors
/// [`ZinbError::Sampling`] if a required node is missing from `posterior`.
pub fn assemble(
    posterior: PosteriorSummary,
    partition: &Partition,
) -> Result<EstimationResult, ZinbError> {
    let mut estimates = Table::with_capacity(partition.n_areas());
    for (area, slot) in partition.slots().iter().enumerate() {
        let node = match *slot {
            AreaSlot::Sampled(k) => Node::MuEff(k),
            AreaSlot::NonSampled(k) => Node::MuEffNonsampled(k),
        };
        estimates.push((area + 1).to_string(), *posterior.require(node)?);
    }

    let nvar = partition.nvar();
    let mut coefficients = Table::with_capacity(2 * nvar);
    for k in 0..nvar {
        coefficients.push(format!("b[{k}]"), *posterior.require(Node::B(k))?);
    }
    for k in 0..nvar {
        coefficients.push(format!("g[{k}]"), *posterior.require(Node::G(k))?);
    }

    let mut variances = Table::with_capacity(2);
    variances.push("var.u".to_string(), *posterior.require(Node::VarU)?);
    variances.push("var.v".to_string(), *posterior.require(Node::VarV)?);

    Ok(EstimationResult {
        estimates,
        coefficients,
        variances,
        draws: posterior.into_draws(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::{AreaData, partition};
    use crate::model::monitor_order;
    use ndarray::array;

    fn posterior_for(part: &Partition) -> PosteriorSummary {
        let nodes = monitor_order(part.nvar(), part.n_sampled(), part.n_nonsampled());
        let stats = nodes
            .iter()
            .map(|node| match node {
                Node::MuEff(k) => NodeSummary::from_moments(*k as f64, 1.0),
                Node::MuEffNonsampled(k) => NodeSummary::from_moments(100.0 + *k as f64, 1.0),
                Node::B(k) => NodeSummary::from_moments(10.0 + *k as f64, 1.0),
                Node::G(k) => NodeSummary::from_moments(20.0 + *k as f64, 1.0),
                _ => NodeSummary::from_moments(0.5, 0.1),
            })
            .collect();
        PosteriorSummary::new(nodes, stats).unwrap()
    }

    #[test]
    fn mixed_mode_is_deinterleaved() {
        let data = AreaData::new(
            vec![None, Some(1), Some(2), None, Some(0)],
            array![[1.0], [2.0], [3.0], [4.0], [5.0]],
        );
        let part = partition(&data).unwrap();
        let result = assemble(posterior_for(&part), &part).unwrap();

        assert_eq!(result.estimates.len(), 5);
        assert_eq!(
            result.estimates.column("mean").unwrap(),
            vec![100.0, 0.0, 1.0, 101.0, 2.0]
        );
        assert_eq!(result.estimates.labels()[3], "4");
    }

    #[test]
    fn coefficient_labels_are_zero_based_and_ordered() {
        let data = AreaData::new(vec![Some(1), Some(2)], array![[1.0, 0.0], [2.0, 1.0]]);
        let part = partition(&data).unwrap();
        let result = assemble(posterior_for(&part), &part).unwrap();

        assert_eq!(
            result.coefficients.labels(),
            &["b[0]", "b[1]", "b[2]", "g[0]", "g[1]", "g[2]"]
        );
        assert_eq!(result.coefficients.get("g[1]").unwrap().mean, 21.0);
        assert_eq!(result.variances.labels(), &["var.u", "var.v"]);
        assert!(result.draws.is_none());
    }

    #[test]
    fn missing_node_fails_assembly() {
        let data = AreaData::new(vec![Some(1), None], array![[1.0], [2.0]]);
        let part = partition(&data).unwrap();
        let nodes = monitor_order(part.nvar(), 1, 0);
        let stats = vec![NodeSummary::from_moments(1.0, 1.0); nodes.len()];
        let posterior = PosteriorSummary::new(nodes, stats).unwrap();
        assert!(matches!(
            assemble(posterior, &part),
            Err(ZinbError::Sampling(msg)) if msg.contains("mu_eff_nonsampled[1]")
        ));
    }

    #[test]
    fn unknown_column_is_none() {
        let table = Table::with_capacity(0);
        assert!(table.is_empty());
        assert!(table.column("median").is_none());
        assert_eq!(table.column("sd"), Some(vec![]));
    }
}
