//! Specific-loss table across datasets and its per-dataset summary.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::analysis::chromosomal_loss::LossTable;
use crate::helper_functions::{dataframe_to_csv, round_to};
use crate::models::{Direction, LossOrientation, SpecificLossEntry};

/// Which chromosome end a directional loss points to, from the arm name (`1p`, `Xq`, …).
pub fn telomere_or_centromere(arm: &str, direction: Direction) -> Option<LossOrientation> {
    match (arm.chars().last()?, direction) {
        ('p', Direction::ThreePrime) => Some(LossOrientation::Centromere),
        ('p', Direction::FivePrime) => Some(LossOrientation::Telomere),
        ('q', Direction::ThreePrime) => Some(LossOrientation::Telomere),
        ('q', Direction::FivePrime) => Some(LossOrientation::Centromere),
        _ => None,
    }
}

/// Cells carrying the perturbation, recovered from the affected count and percentage.
pub fn total_cell_count(affected_cells: usize, affected_pct: f64) -> Option<usize> {
    if affected_pct <= 0.0 || !affected_pct.is_finite() {
        return None;
    }
    Some((affected_cells as f64 / affected_pct * 100.0).round() as usize)
}

/// One row of the full specific-loss table.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecificLossRow {
    pub perturbed_gene: String,
    pub perturbation_type: String,
    pub dataset: String,
    pub chr_arm: Option<String>,
    pub direction: Direction,
    pub total_cells: Option<usize>,
    pub affected_cells: usize,
    /// Percentage, rounded to two decimals.
    pub affected_pct: f64,
    pub orientation: Option<LossOrientation>,
}

/// One row of the summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub perturbation_type: String,
    pub dataset: String,
    pub tested_targets: usize,
    pub direction: Direction,
    pub specific_pct: f64,
    pub specific_targets: usize,
    pub telomere_targets: usize,
    pub centromere_targets: usize,
}

/// Specific-loss rows of one dataset and direction, highest affected percentage first.
pub fn specific_loss_rows(
    table: &LossTable,
    specific: &[SpecificLossEntry],
    direction: Direction,
    dataset: &str,
    perturbation_type: &str,
) -> Vec<SpecificLossRow> {
    let mut rows: Vec<SpecificLossRow> = specific
        .iter()
        .filter(|entry| entry.direction == direction)
        .filter_map(|entry| table.self_pair(&entry.gene))
        .map(|record| {
            let loss = record.loss(direction);
            let pct = loss.cell_frac.unwrap_or(0.0) * 100.0;
            SpecificLossRow {
                perturbed_gene: record.ko_gene.clone(),
                perturbation_type: perturbation_type.to_string(),
                dataset: dataset.to_string(),
                chr_arm: record.ko_arm.clone(),
                direction,
                total_cells: total_cell_count(loss.cell_count, pct),
                affected_cells: loss.cell_count,
                affected_pct: round_to(pct, 2),
                orientation: record
                    .ko_arm
                    .as_deref()
                    .and_then(|arm| telomere_or_centromere(arm, direction)),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.affected_pct.total_cmp(&a.affected_pct));
    rows
}

/// Results gathered over all datasets.
#[derive(Debug, Clone, Default)]
pub struct SpecificLossReport {
    pub rows: Vec<SpecificLossRow>,
    /// (perturbation type, dataset) → distinct affected genes tested, in processing order.
    pub tested: Vec<(String, String, usize)>,
}

impl SpecificLossReport {
    /// Record a processed dataset; `tested_targets` counts its distinct affected genes.
    pub fn add_dataset(
        &mut self,
        perturbation_type: &str,
        dataset: &str,
        tested_targets: usize,
        rows: Vec<SpecificLossRow>,
    ) {
        let entry = (perturbation_type.to_string(), dataset.to_string(), tested_targets);
        match self.tested.iter().position(|(_, d, _)| d == dataset) {
            Some(i) => self.tested[i] = entry,
            None => self.tested.push(entry),
        }
        self.rows.extend(rows);
    }

    /// One summary row per (perturbation type, dataset, direction), also when nothing was specific.
    pub fn summary(&self) -> Vec<SummaryRow> {
        let mut groups: BTreeMap<(String, String, Direction), Vec<&SpecificLossRow>> =
            BTreeMap::new();
        for (ptype, dataset, _) in &self.tested {
            for direction in Direction::REPORT_ORDER {
                groups.entry((ptype.clone(), dataset.clone(), direction)).or_default();
            }
        }
        for row in &self.rows {
            groups
                .entry((row.perturbation_type.clone(), row.dataset.clone(), row.direction))
                .or_default()
                .push(row);
        }

        let tested: HashMap<&str, usize> = self
            .tested
            .iter()
            .map(|(_, d, n)| (d.as_str(), *n))
            .collect();

        groups
            .into_iter()
            .map(|((perturbation_type, dataset, direction), rows)| {
                let tested_targets = tested.get(dataset.as_str()).copied().unwrap_or(0);
                let specific_targets = rows.len();
                let count = |o: LossOrientation| {
                    rows.iter().filter(|r| r.orientation == Some(o)).count()
                };
                let specific_pct = if tested_targets == 0 {
                    0.0
                } else {
                    round_to(specific_targets as f64 / tested_targets as f64 * 100.0, 1)
                };
                SummaryRow {
                    telomere_targets: count(LossOrientation::Telomere),
                    centromere_targets: count(LossOrientation::Centromere),
                    perturbation_type,
                    dataset,
                    tested_targets,
                    direction,
                    specific_pct,
                    specific_targets,
                }
            })
            .collect()
    }

    pub fn rows_dataframe(&self) -> PolarsResult<DataFrame> {
        let rows = &self.rows;
        df![
            "Perturbed gene" => rows.iter().map(|r| r.perturbed_gene.clone()).collect::<Vec<_>>(),
            "Perturbation type" => rows.iter().map(|r| r.perturbation_type.clone()).collect::<Vec<_>>(),
            "Dataset" => rows.iter().map(|r| r.dataset.clone()).collect::<Vec<_>>(),
            "Chr arm" => rows.iter().map(|r| r.chr_arm.clone()).collect::<Vec<_>>(),
            "Tested loss direction" => rows.iter().map(|r| r.direction.label().to_string()).collect::<Vec<_>>(),
            "Total # cells" => rows.iter().map(|r| r.total_cells.map(|n| n as u64)).collect::<Vec<_>>(),
            "# affected cells" => rows.iter().map(|r| r.affected_cells as u64).collect::<Vec<_>>(),
            "% affected cells" => rows.iter().map(|r| r.affected_pct).collect::<Vec<_>>(),
            "Towards telomere or centromere" => rows.iter().map(|r| r.orientation.map(|o| o.to_string())).collect::<Vec<_>>()
        ]
    }

    pub fn summary_dataframe(&self) -> PolarsResult<DataFrame> {
        let rows = self.summary();
        df![
            "Perturbation type" => rows.iter().map(|r| r.perturbation_type.clone()).collect::<Vec<_>>(),
            "Dataset" => rows.iter().map(|r| r.dataset.clone()).collect::<Vec<_>>(),
            "Total # tested targets" => rows.iter().map(|r| r.tested_targets as u64).collect::<Vec<_>>(),
            "Tested loss direction" => rows.iter().map(|r| r.direction.label().to_string()).collect::<Vec<_>>(),
            "% targets w/ specific loss" => rows.iter().map(|r| r.specific_pct).collect::<Vec<_>>(),
            "# targets w/ specific loss" => rows.iter().map(|r| r.specific_targets as u64).collect::<Vec<_>>(),
            "# targets w/ loss towards telomere" => rows.iter().map(|r| r.telomere_targets as u64).collect::<Vec<_>>(),
            "# targets w/ loss towards centromere" => rows.iter().map(|r| r.centromere_targets as u64).collect::<Vec<_>>()
        ]
    }

    pub fn write(&self, full_path: &Path, summary_path: &Path) -> PolarsResult<()> {
        dataframe_to_csv(&mut self.rows_dataframe()?, full_path)?;
        dataframe_to_csv(&mut self.summary_dataframe()?, summary_path)?;
        info!(
            "Wrote {} specific-loss rows to {} and the summary to {}",
            self.rows.len(),
            full_path.display(),
            summary_path.display()
        );
        Ok(())
    }
}
