//! Chromosomal loss around every perturbed locus, for every perturbation.
//!
//! Loss is computed for the full affected × perturbing product, not only for
//! self-pairs: the off-diagonal pairs are the background against which a gene's
//! loss at its own locus is later judged.

use std::collections::HashMap;

use anyhow::{ensure, Result};
use tracing::{debug, info};

use crate::config::LossParams;
use crate::data_handling::cnv_matrix::LowCnvMatrix;
use crate::genomic_index::{GeneLocus, GenomicIndex};
use crate::models::{CellLabel, DirectionalLoss, LossRecord};

/// Which cells carry which perturbation, aligned with the rows of the CNV matrix.
#[derive(Debug, Clone)]
pub struct PerturbationAssignment {
    cell_ids: Vec<String>,
    /// Per cell, the perturbed gene or an empty string.
    genes: Vec<String>,
}

impl PerturbationAssignment {
    pub fn new(cell_ids: Vec<String>, genes: Vec<String>) -> Result<Self> {
        ensure!(
            cell_ids.len() == genes.len(),
            "{} cells but {} gene entries",
            cell_ids.len(),
            genes.len()
        );
        Ok(Self { cell_ids, genes })
    }

    pub fn from_cells(cells: &[CellLabel]) -> Self {
        Self {
            cell_ids: cells.iter().map(|c| c.cell_id.clone()).collect(),
            genes: cells.iter().map(|c| c.gene.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_ids.is_empty()
    }

    pub fn cell_id(&self, row: usize) -> &str {
        &self.cell_ids[row]
    }

    /// Row indices of the cells of each non-empty gene.
    pub fn rows_by_gene(&self) -> HashMap<&str, Vec<usize>> {
        let mut rows: HashMap<&str, Vec<usize>> = HashMap::new();
        for (row, gene) in self.genes.iter().enumerate() {
            if !gene.is_empty() {
                rows.entry(gene.as_str()).or_default().push(row);
            }
        }
        rows
    }
}

/// The per-pair loss table of one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossTable {
    pub records: Vec<LossRecord>,
}

impl LossTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct affected genes, i.e. tested targets.
    pub fn tested_target_count(&self) -> usize {
        let mut genes: Vec<&str> = self.records.iter().map(|r| r.aff_gene.as_str()).collect();
        genes.sort_unstable();
        genes.dedup();
        genes.len()
    }

    pub fn self_pair(&self, gene: &str) -> Option<&LossRecord> {
        self.records.iter().find(|r| r.aff_gene == gene && r.ko_gene == gene)
    }
}

fn directional_loss(
    low_frac: &[f64],
    frac_cutoff: f64,
    rows: &[usize],
    assignment: &PerturbationAssignment,
) -> DirectionalLoss {
    let cells: Vec<String> = rows
        .iter()
        .filter(|&&row| low_frac[row] >= frac_cutoff)
        .map(|&row| assignment.cell_id(row).to_string())
        .collect();
    let cell_count = cells.len();
    let cell_frac = if rows.is_empty() {
        None
    } else {
        Some(cell_count as f64 / rows.len() as f64)
    };
    DirectionalLoss {
        cells,
        cell_count,
        cell_frac,
    }
}

/// Compute loss in both directions for every (affected, perturbing) gene pair.
///
/// Perturbing genes are the non-empty assigned genes that belong to the dataset;
/// affected genes are those of them that have a locus. Records are laid out
/// affected-major, so record `a * n_perturbing + k` pairs affected gene `a` with
/// perturbing gene `k`.
pub fn compute_chromosomal_loss(
    matrix: &LowCnvMatrix,
    assignment: &PerturbationAssignment,
    index: &GenomicIndex,
    params: &LossParams,
) -> Result<LossTable> {
    ensure!(
        matrix.n_cells() == assignment.len(),
        "CNV matrix has {} rows for {} assigned cells",
        matrix.n_cells(),
        assignment.len()
    );

    let rows_by_gene = assignment.rows_by_gene();
    let mut perturbing: Vec<&str> = rows_by_gene
        .keys()
        .copied()
        .filter(|g| index.contains(g))
        .collect();
    perturbing.sort_unstable();

    let affected: Vec<&GeneLocus> = perturbing.iter().filter_map(|g| index.locus(g)).collect();
    info!(
        "Computing loss for {} affected × {} perturbing genes over {} cells",
        affected.len(),
        perturbing.len(),
        assignment.len()
    );

    let max_radius = params.max_block_radius();
    let n_blocks = matrix.n_blocks();
    let mut records = Vec::with_capacity(affected.len() * perturbing.len());
    let report_every = (affected.len() / 10).max(1);

    for (a, locus) in affected.iter().enumerate() {
        if (a + 1) % report_every == 0 {
            info!("Loss computation: {}/{} affected genes", a + 1, affected.len());
        }
        let Some((window_5p, window_3p)) = index.neighborhood(locus, max_radius, n_blocks) else {
            debug!("{} lies outside the CNV matrix, skipping", locus.gene);
            continue;
        };
        let low_5p = matrix.low_fraction(*window_5p.start(), *window_5p.end());
        let low_3p = matrix.low_fraction(*window_3p.start(), *window_3p.end());

        for &ko_gene in &perturbing {
            let rows = rows_by_gene.get(ko_gene).map(Vec::as_slice).unwrap_or(&[]);
            let ko_locus = index.locus(ko_gene);
            records.push(LossRecord {
                ko_gene: ko_gene.to_string(),
                aff_gene: locus.gene.clone(),
                ko_chr: ko_locus.map(|l| l.chromosome.clone()),
                ko_arm: ko_locus.map(|l| l.arm.clone()),
                aff_chr: locus.chromosome.clone(),
                aff_arm: locus.arm.clone(),
                loss_5p: directional_loss(&low_5p, params.frac_cutoff, rows, assignment),
                loss_3p: directional_loss(&low_3p, params.frac_cutoff, rows, assignment),
            });
        }
    }

    Ok(LossTable { records })
}
