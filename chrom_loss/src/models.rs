use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// A dataset that can be turned into per-cell perturbation labels plus its gene list.
pub trait Dataset {
    fn load(&self) -> anyhow::Result<PerturbSeqData>;
}

/// Wrap any foreign error as a polars compute error so table code can stay on `PolarsResult`.
pub fn polars_err(e: Box<dyn std::error::Error>) -> PolarsError {
    PolarsError::ComputeError(e.to_string().into())
}

/// Direction of the neighbourhood tested around a cut site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    ThreePrime,
    FivePrime,
}

impl Direction {
    /// Order in which directions are reported.
    pub const REPORT_ORDER: [Direction; 2] = [Direction::ThreePrime, Direction::FivePrime];

    /// Column tag used in the per-pair loss table (`loss3p_…`).
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::ThreePrime => "3p",
            Direction::FivePrime => "5p",
        }
    }

    /// Display label used in the report tables.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::ThreePrime => "3'",
            Direction::FivePrime => "5'",
        }
    }

    pub fn from_label(label: &str) -> Option<Direction> {
        match label {
            "3'" => Some(Direction::ThreePrime),
            "5'" => Some(Direction::FivePrime),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Whether a directional loss points at the chromosome end or at its centromere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossOrientation {
    Telomere,
    Centromere,
}

impl fmt::Display for LossOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LossOrientation::Telomere => "telomere",
            LossOrientation::Centromere => "centromere",
        };
        write!(f, "{s}")
    }
}

/// One cell after label normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct CellLabel {
    pub cell_id: String,
    /// Perturbed gene, empty for controls and unassigned cells.
    pub gene: String,
    /// Reference label handed to CNV inference ("control" or the gene).
    pub perturbation_label: String,
}

/// A loaded perturb-seq dataset, restricted to cells with a non-empty label.
#[derive(Debug, Clone)]
pub struct PerturbSeqData {
    pub name: String,
    pub cells: Vec<CellLabel>,
    /// Dataset genes in their original order.
    pub genes: Vec<String>,
}

impl PerturbSeqData {
    pub fn cell_ids(&self) -> Vec<&str> {
        self.cells.iter().map(|c| c.cell_id.as_str()).collect()
    }

    /// Keep only cells whose gene is in `genes` or whose label is `control_label`.
    pub fn subset(&self, genes: &[String], control_label: &str) -> PerturbSeqData {
        let cells = self
            .cells
            .iter()
            .filter(|c| c.perturbation_label == control_label || genes.contains(&c.gene))
            .cloned()
            .collect();
        PerturbSeqData {
            name: self.name.clone(),
            cells,
            genes: self.genes.clone(),
        }
    }
}

/// Loss observed for one (affected, perturbing) pair in one direction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectionalLoss {
    pub cells: Vec<String>,
    pub cell_count: usize,
    /// `cell_count` over all cells carrying the perturbation; `None` when there are none.
    pub cell_frac: Option<f64>,
}

/// One row of the per-pair loss table.
#[derive(Debug, Clone, PartialEq)]
pub struct LossRecord {
    pub ko_gene: String,
    pub aff_gene: String,
    pub ko_chr: Option<String>,
    pub ko_arm: Option<String>,
    pub aff_chr: String,
    pub aff_arm: String,
    pub loss_5p: DirectionalLoss,
    pub loss_3p: DirectionalLoss,
}

impl LossRecord {
    pub fn loss(&self, direction: Direction) -> &DirectionalLoss {
        match direction {
            Direction::FivePrime => &self.loss_5p,
            Direction::ThreePrime => &self.loss_3p,
        }
    }

    pub fn is_self_pair(&self) -> bool {
        self.ko_gene == self.aff_gene
    }
}

/// A self-pair whose loss fraction is an outlier among all perturbations at that locus.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecificLossEntry {
    pub gene: String,
    pub direction: Direction,
    pub zscore: f64,
    pub cell_count: usize,
    pub cell_frac: f64,
}
