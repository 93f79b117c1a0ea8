//! Per-dataset export for eyeballing specific losses.
//!
//! For each selected gene the cells with loss and the remaining cells of that
//! perturbation are listed next to their CNV rows, block-averaged so that a whole
//! genome fits in a heatmap.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView2, Axis};
use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::chromosomal_loss::{LossTable, PerturbationAssignment};
use crate::data_handling::cnv_matrix::CnvProfile;
use crate::genomic_index::GenomicIndex;
use crate::helper_functions::dataframe_to_csv;
use crate::models::Direction;

/// Genes picked for inspection and the directions in which each was specific.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionSelection {
    /// Sorted, distinct.
    pub genes: Vec<String>,
    pub directions: HashMap<String, Vec<Direction>>,
}

/// Rows of the specific-loss table for one dataset with at least `cell_count_threshold`
/// affected cells.
pub fn select_perturbations(
    specific: &DataFrame,
    dataset_short: &str,
    cell_count_threshold: usize,
) -> PolarsResult<InspectionSelection> {
    let selected = specific
        .clone()
        .lazy()
        .filter(
            col("Dataset")
                .cast(DataType::String)
                .eq(lit(dataset_short.to_string()))
                .and(
                    col("# affected cells")
                        .cast(DataType::Int64)
                        .gt_eq(lit(cell_count_threshold as i64)),
                ),
        )
        .select([col("Perturbed gene"), col("Tested loss direction")])
        .collect()?;

    let genes = selected.column("Perturbed gene")?.str()?;
    let labels = selected.column("Tested loss direction")?.str()?;

    let mut selection = InspectionSelection::default();
    for (gene, label) in genes.into_iter().zip(labels.into_iter()) {
        let (Some(gene), Some(label)) = (gene, label) else {
            continue;
        };
        let direction = Direction::from_label(label).ok_or_else(|| {
            PolarsError::ComputeError(format!("unknown loss direction '{label}'").into())
        })?;
        let directions = selection.directions.entry(gene.to_string()).or_default();
        if !directions.contains(&direction) {
            directions.push(direction);
        }
    }
    selection.genes = selection.directions.keys().cloned().collect();
    selection.genes.sort();
    Ok(selection)
}

/// Cells of one inspected perturbation, split by whether they show the loss.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionGroup {
    pub gene: String,
    pub block_number: usize,
    pub loss_cells: Vec<String>,
    pub other_cells: Vec<String>,
}

/// Group the cells of every selected gene; loss cells are pooled over its specific directions.
pub fn inspection_groups(
    selection: &InspectionSelection,
    table: &LossTable,
    assignment: &PerturbationAssignment,
    index: &GenomicIndex,
) -> Vec<InspectionGroup> {
    let rows_by_gene = assignment.rows_by_gene();
    let mut groups = Vec::with_capacity(selection.genes.len());

    for gene in &selection.genes {
        let Some(record) = table.self_pair(gene) else {
            warn!("{} has no self-pair in the loss table, skipping", gene);
            continue;
        };
        let Some(locus) = index.locus(gene) else {
            warn!("{} has no locus in the inspection CNV profile, skipping", gene);
            continue;
        };

        let mut seen = HashSet::new();
        let mut loss_cells = Vec::new();
        for &direction in selection.directions.get(gene).into_iter().flatten() {
            for cell in &record.loss(direction).cells {
                if seen.insert(cell.as_str()) {
                    loss_cells.push(cell.clone());
                }
            }
        }
        let other_cells = rows_by_gene
            .get(gene.as_str())
            .into_iter()
            .flatten()
            .map(|&row| assignment.cell_id(row))
            .filter(|cell| !seen.contains(cell))
            .map(str::to_string)
            .collect();

        groups.push(InspectionGroup {
            gene: gene.clone(),
            block_number: locus.block_number,
            loss_cells,
            other_cells,
        });
    }
    groups
}

/// Mean over consecutive groups of `crunch` columns.
///
/// A trailing short group is averaged over what it has.
pub fn block_reduce_mean(values: ArrayView2<f64>, crunch: usize) -> Array2<f64> {
    let crunch = crunch.max(1);
    let mut reduced = Array2::zeros((values.nrows(), values.ncols().div_ceil(crunch)));
    for (j, chunk) in values.axis_chunks_iter(Axis(1), crunch).enumerate() {
        if let Some(mean) = chunk.mean_axis(Axis(1)) {
            reduced.column_mut(j).assign(&mean);
        }
    }
    reduced
}

/// Midpoints between consecutive boundaries.
pub fn mid_ticks(boundaries: &[f64]) -> Vec<f64> {
    boundaries.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockMark {
    pub gene: String,
    pub position: f64,
}

/// Heatmap axis layout, in block-reduced coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectionTicks {
    pub chromosomes: Vec<String>,
    pub boundaries: Vec<f64>,
    pub mid_ticks: Vec<f64>,
    pub gene_blocks: Vec<BlockMark>,
}

impl InspectionTicks {
    pub fn new(profile: &CnvProfile, groups: &[InspectionGroup], crunch: usize) -> Self {
        let crunch = crunch.max(1) as f64;
        let mut bounds: Vec<f64> = profile.chr_pos.iter().map(|(_, b)| *b as f64).collect();
        bounds.push(profile.n_blocks() as f64);
        let mid = mid_ticks(&bounds);
        bounds.pop();
        Self {
            chromosomes: profile.chr_pos.iter().map(|(c, _)| c.clone()).collect(),
            boundaries: bounds.iter().map(|b| b / crunch).collect(),
            mid_ticks: mid.iter().map(|m| m / crunch).collect(),
            gene_blocks: groups
                .iter()
                .map(|g| BlockMark {
                    gene: g.gene.clone(),
                    position: g.block_number as f64 / crunch,
                })
                .collect(),
        }
    }
}

/// Everything written for one dataset.
#[derive(Debug, Clone)]
pub struct InspectionExport {
    pub groups: Vec<InspectionGroup>,
    /// Listed cells in `cells_frame` order.
    pub cell_ids: Vec<String>,
    pub reduced_cnv: Array2<f64>,
    pub ticks: InspectionTicks,
}

impl InspectionExport {
    pub fn build(
        groups: Vec<InspectionGroup>,
        profile: &CnvProfile,
        crunch: usize,
    ) -> Result<Self> {
        let cell_ids: Vec<String> = groups
            .iter()
            .flat_map(|g| g.loss_cells.iter().chain(&g.other_cells))
            .cloned()
            .collect();
        let refs: Vec<&str> = cell_ids.iter().map(String::as_str).collect();
        let rows = profile.aligned_to(&refs)?;
        let ticks = InspectionTicks::new(profile, &groups, crunch);
        Ok(Self {
            reduced_cnv: block_reduce_mean(rows.view(), crunch),
            groups,
            cell_ids,
            ticks,
        })
    }

    pub fn cells_frame(&self) -> PolarsResult<DataFrame> {
        let mut gene = Vec::new();
        let mut block = Vec::new();
        let mut group = Vec::new();
        let mut cell = Vec::new();
        for g in &self.groups {
            for (label, cells) in [("loss", &g.loss_cells), ("other", &g.other_cells)] {
                for c in cells {
                    gene.push(g.gene.clone());
                    block.push(g.block_number as u64);
                    group.push(label);
                    cell.push(c.clone());
                }
            }
        }
        df![
            "gene" => gene,
            "block_number" => block,
            "group" => group,
            "cell_id" => cell
        ]
    }

    pub fn cnv_frame(&self) -> PolarsResult<DataFrame> {
        let mut columns = vec![Column::from(Series::new(
            "cell_id".into(),
            self.cell_ids.clone(),
        ))];
        for (j, values) in self.reduced_cnv.axis_iter(Axis(1)).enumerate() {
            columns.push(Column::from(Series::new(
                j.to_string().into(),
                values.to_vec(),
            )));
        }
        DataFrame::new(columns)
    }

    /// Write `<prefix>_cells.csv`, `<prefix>_cnv.csv` and `<prefix>_ticks.json`.
    pub fn write(&self, prefix: &Path) -> Result<Vec<PathBuf>> {
        let with_suffix = |suffix: &str| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        let cells_path = with_suffix("_cells.csv");
        let cnv_path = with_suffix("_cnv.csv");
        let ticks_path = with_suffix("_ticks.json");

        dataframe_to_csv(&mut self.cells_frame()?, &cells_path)?;
        dataframe_to_csv(&mut self.cnv_frame()?, &cnv_path)?;
        let file = File::create(&ticks_path)
            .with_context(|| format!("Cannot create {}", ticks_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.ticks)?;
        writer.flush()?;

        info!(
            "Inspection export: {} genes, {} cells, {} reduced blocks → {}",
            self.groups.len(),
            self.cell_ids.len(),
            self.reduced_cnv.ncols(),
            cells_path.display()
        );
        Ok(vec![cells_path, cnv_path, ticks_path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::chromosomal_loss::compute_chromosomal_loss;
    use crate::analysis::chromosomal_loss::tests::{toy_dataset, CELLS_PER_GENE};
    use crate::config::LossParams;
    use ndarray::array;

    #[test]
    fn block_reduce_averages_partial_tail() {
        let values = array![[1.0, 3.0, 5.0, 7.0, 10.0], [0.0, 0.0, -2.0, 2.0, -1.0]];
        let reduced = block_reduce_mean(values.view(), 2);
        assert_eq!(reduced, array![[2.0, 6.0, 10.0], [0.0, 0.0, -1.0]]);
        assert_eq!(block_reduce_mean(values.view(), 1), values);
    }

    #[test]
    fn mid_ticks_between_boundaries() {
        assert_eq!(mid_ticks(&[0.0, 10.0, 20.0, 40.0]), vec![5.0, 15.0, 30.0]);
        assert!(mid_ticks(&[3.0]).is_empty());
    }

    #[test]
    fn selection_filters_dataset_and_threshold() {
        let df = polars::df![
            "Perturbed gene" => &["CD58", "CD58", "B2M", "JAK1"],
            "Dataset" => &["Frangieh", "Frangieh", "Frangieh", "Papalexi"],
            "Tested loss direction" => &["3'", "5'", "3'", "3'"],
            "# affected cells" => &[25i64, 40, 12, 90]
        ]
        .unwrap();
        let selection = select_perturbations(&df, "Frangieh", 20).unwrap();
        assert_eq!(selection.genes, vec!["CD58".to_string()]);
        assert_eq!(
            selection.directions["CD58"],
            vec![Direction::ThreePrime, Direction::FivePrime]
        );
    }

    #[test]
    fn groups_split_loss_from_other_cells() {
        let (matrix, assignment, index) = toy_dataset();
        let table = compute_chromosomal_loss(&matrix, &assignment, &index, &LossParams::default())
            .unwrap();
        let selection = InspectionSelection {
            genes: vec!["G1".into(), "G2".into(), "UNPLACED".into()],
            directions: [
                ("G1".to_string(), vec![Direction::ThreePrime, Direction::FivePrime]),
                ("G2".to_string(), vec![Direction::ThreePrime]),
                ("UNPLACED".to_string(), vec![Direction::ThreePrime]),
            ]
            .into_iter()
            .collect(),
        };

        let groups = inspection_groups(&selection, &table, &assignment, &index);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].gene, "G1");
        assert_eq!(groups[0].block_number, 0);
        assert_eq!(groups[0].loss_cells.len(), CELLS_PER_GENE);
        assert!(groups[0].other_cells.is_empty());
        assert!(groups[1].loss_cells.is_empty());
        assert_eq!(groups[1].other_cells.len(), CELLS_PER_GENE);
    }

    #[test]
    fn export_writes_three_files() {
        let groups = vec![InspectionGroup {
            gene: "G1".into(),
            block_number: 2,
            loss_cells: vec!["b".into()],
            other_cells: vec!["a".into()],
        }];
        let profile = CnvProfile {
            cell_ids: vec!["a".into(), "b".into(), "ctrl".into()],
            values: array![[0.0, 0.2, 0.4, 0.6], [-0.2, -0.4, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]],
            chr_pos: vec![("1".into(), 0), ("2".into(), 2)],
        };
        let export = InspectionExport::build(groups, &profile, 2).unwrap();
        assert_eq!(export.cell_ids, vec!["b", "a"]);
        assert!((export.reduced_cnv[[0, 0]] + 0.3).abs() < 1e-12);
        assert_eq!(export.reduced_cnv[[1, 1]], 0.5);
        assert_eq!(export.ticks.boundaries, vec![0.0, 1.0]);
        assert_eq!(export.ticks.mid_ticks, vec![0.5, 1.5]);
        assert_eq!(export.ticks.gene_blocks[0].position, 1.0);

        let dir = tempfile::tempdir().unwrap();
        let written = export.write(&dir.path().join("Frangieh_inspection")).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|p| p.exists()));
        let cells = crate::helper_functions::read_csv(&written[0]).unwrap();
        assert_eq!(cells.height(), 2);
    }
}
