//! Dataset-level stages: cached loss tables, the cross-dataset report and inspection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::analysis::chromosomal_loss::{
    compute_chromosomal_loss, LossTable, PerturbationAssignment,
};
use crate::analysis::inspection::{inspection_groups, select_perturbations, InspectionExport};
use crate::analysis::specificity::score_specificity;
use crate::analysis::summary::{specific_loss_rows, SpecificLossReport};
use crate::cnv_inference::{CnvInference, CnvParams};
use crate::config::{DatasetCatalog, PipelineConfig, CONTROL_LABEL};
use crate::data_handling::annotation::GeneAnnotations;
use crate::data_handling::cnv_matrix::LowCnvMatrix;
use crate::data_handling::scperturb::ScPerturbDataset;
use crate::genomic_index::GenomicIndex;
use crate::helper_functions::{read_csv, short_dataset_name};
use crate::models::{Dataset, Direction, PerturbSeqData};

pub struct Pipeline<C: CnvInference> {
    pub config: PipelineConfig,
    pub catalog: DatasetCatalog,
    pub annotations: GeneAnnotations,
    pub cnv: C,
}

impl<C: CnvInference> Pipeline<C> {
    pub fn new(
        config: PipelineConfig,
        catalog: DatasetCatalog,
        annotations: GeneAnnotations,
        cnv: C,
    ) -> Self {
        Self {
            config,
            catalog,
            annotations,
            cnv,
        }
    }

    fn load_dataset(&self, dataset: &str) -> Result<PerturbSeqData> {
        let meta = self.catalog.get(dataset)?;
        ScPerturbDataset {
            name: dataset.to_string(),
            dir: self.config.dataset_dir(dataset),
            label_rule: meta.label_rule.clone(),
        }
        .load()
    }

    fn cnv_params(&self) -> CnvParams {
        CnvParams::from_loss_params(&self.config.params)
    }

    /// Per-pair loss table of one dataset, computed unless a cached file exists.
    ///
    /// The cache is keyed on the file name only; `force` recomputes.
    pub fn apply_cnv_and_save_loss_info(&self, dataset: &str) -> Result<PathBuf> {
        let path = self.config.loss_table_path(dataset);
        if path.exists() && !self.config.force {
            info!("Loss table {} exists, skipping CNV inference", path.display());
            return Ok(path);
        }

        let params = &self.config.params;
        let data = self.load_dataset(dataset)?;
        let profile = self
            .cnv
            .infer(&data, &self.cnv_params())
            .with_context(|| format!("CNV inference failed for {dataset}"))?;
        let values = profile.aligned_to(&data.cell_ids())?;

        let matrix = LowCnvMatrix::from_cnv_values(&values, params.cnv_cutoff);
        let index = GenomicIndex::build(
            &data.genes,
            &self.annotations,
            &profile.chr_start_blocks(),
            params.block_size,
        );
        let assignment = PerturbationAssignment::from_cells(&data.cells);

        let table = compute_chromosomal_loss(&matrix, &assignment, &index, params)?;
        table
            .write_csv(&path)
            .with_context(|| format!("Cannot write loss table {}", path.display()))?;
        Ok(path)
    }

    /// Loss tables of several datasets; a dataset that fails is logged and skipped.
    ///
    /// Returns the datasets whose table is now on disk, with its path.
    pub fn compute_loss_tables(&self, datasets: &[String]) -> Vec<(String, PathBuf)> {
        let mut written = Vec::new();
        for dataset in datasets {
            match self.apply_cnv_and_save_loss_info(dataset) {
                Ok(path) => written.push((dataset.clone(), path)),
                Err(e) => error!("Loss table for {} failed: {:#}", dataset, e),
            }
        }
        written
    }

    /// Loss tables for all datasets, then the specific-loss table and its summary.
    ///
    /// A dataset whose short name is not in the catalog is logged and left out.
    pub fn generate_specific_loss_and_summary_tables(
        &self,
        datasets: &[String],
    ) -> Result<SpecificLossReport> {
        let mut report = SpecificLossReport::default();
        for dataset in datasets {
            let meta = match self.catalog.get(dataset) {
                Ok(meta) => meta,
                Err(e) => {
                    error!("Skipping {}: {:#}", dataset, e);
                    continue;
                }
            };
            let short = short_dataset_name(dataset)?;

            let path = self.apply_cnv_and_save_loss_info(dataset)?;
            let table = LossTable::read_csv(&path)
                .with_context(|| format!("Cannot read loss table {}", path.display()))?;

            let mut rows = Vec::new();
            for direction in Direction::REPORT_ORDER {
                let specific =
                    score_specificity(&table, direction, self.config.params.zscore_cutoff);
                rows.extend(specific_loss_rows(
                    &table,
                    &specific,
                    direction,
                    &short,
                    &meta.perturbation_type,
                ));
            }
            report.add_dataset(&meta.perturbation_type, &short, table.tested_target_count(), rows);
        }

        report.write(&self.config.specific_loss_path(), &self.config.summary_path())?;
        Ok(report)
    }

    /// Export loss and non-loss cells of the dataset's well-supported hits.
    ///
    /// Needs the specific-loss table from the report stage and the cached loss table.
    pub fn inspect(&self, dataset: &str) -> Result<Vec<PathBuf>> {
        let short = short_dataset_name(dataset)?;
        let threshold = self.catalog.cell_count_threshold(dataset)?;
        let crunch = self.catalog.crunch_size(dataset)?;

        let specific_path = self.config.specific_loss_path();
        let specific = read_csv(&specific_path).with_context(|| {
            format!("Cannot read {}; run the report first", specific_path.display())
        })?;
        let selection = select_perturbations(&specific, &short, threshold)?;
        if selection.genes.is_empty() {
            warn!("{}: no specific loss with at least {} affected cells", dataset, threshold);
            return Ok(Vec::new());
        }
        info!("{}: inspecting {} genes", dataset, selection.genes.len());

        let table_path = self.config.loss_table_path(dataset);
        let table = LossTable::read_csv(&table_path)
            .with_context(|| format!("Cannot read loss table {}", table_path.display()))?;

        let data = self.load_dataset(dataset)?.subset(&selection.genes, CONTROL_LABEL);
        let profile = self
            .cnv
            .infer(&data, &self.cnv_params())
            .with_context(|| format!("CNV inference failed for {dataset}"))?;
        let index = GenomicIndex::build(
            &data.genes,
            &self.annotations,
            &profile.chr_start_blocks(),
            self.config.params.block_size,
        );
        let assignment = PerturbationAssignment::from_cells(&data.cells);

        let groups = inspection_groups(&selection, &table, &assignment, &index);
        let export = InspectionExport::build(groups, &profile, crunch)?;
        export.write(&self.config.inspection_prefix(dataset))
    }
}
