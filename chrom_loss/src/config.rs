//! Run parameters, output locations and the dataset catalog.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::data_handling::labels::LabelRule;
use crate::helper_functions::short_dataset_name;

pub const CONTROL_LABEL: &str = "control";
pub const REFERENCE_KEY: &str = "perturbation_label";

/// Parameters of CNV inference, loss detection and specificity scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossParams {
    /// Genes per block (also the CNV inference step).
    pub block_size: usize,
    /// CNV inference smoothing window.
    pub window_size: usize,
    /// Neighbour genes considered on each side of a cut site, gene included.
    pub neighborhood: usize,
    /// Minimum fraction of low blocks in a window for a cell to count as lost.
    pub frac_cutoff: f64,
    /// CNV values at or below this are low.
    pub cnv_cutoff: f64,
    pub zscore_cutoff: f64,
}

impl Default for LossParams {
    fn default() -> Self {
        Self {
            block_size: 5,
            window_size: 100,
            neighborhood: 150,
            frac_cutoff: 0.7,
            cnv_cutoff: -0.05,
            zscore_cutoff: 3.0,
        }
    }
}

impl LossParams {
    /// Blocks a window may extend beyond the cut-site block, before chromosome capping.
    pub fn max_block_radius(&self) -> usize {
        (self.neighborhood / self.block_size).saturating_sub(1)
    }
}

/// Where inputs live and outputs go.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub params: LossParams,
    /// Recompute loss tables even when a cached file exists.
    pub force: bool,
}

impl PipelineConfig {
    pub fn new(data_dir: impl Into<PathBuf>, params: LossParams) -> Self {
        Self {
            data_dir: data_dir.into(),
            params,
            force: false,
        }
    }

    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.data_dir.join(dataset)
    }

    /// Cache path of the per-pair loss table.
    ///
    /// Every parameter that changes its content is in the name.
    pub fn loss_table_path(&self, dataset: &str) -> PathBuf {
        let p = &self.params;
        self.data_dir.join(format!(
            "{}_b{}_w{}_n{}_f{}_c{}.csv",
            dataset, p.block_size, p.window_size, p.neighborhood, p.frac_cutoff, p.cnv_cutoff
        ))
    }

    pub fn specific_loss_path(&self) -> PathBuf {
        self.data_dir.join("specific_loss.csv")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.data_dir.join("specific_loss_summary.csv")
    }

    pub fn inspection_prefix(&self, dataset: &str) -> PathBuf {
        self.data_dir.join(format!("{dataset}_inspection"))
    }
}

/// Per-dataset facts that cannot be derived from the data itself.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatasetMetadata {
    pub perturbation_type: String,
    /// Minimum affected cells for a gene to be exported for inspection.
    #[serde(default)]
    pub cell_count_threshold: Option<usize>,
    /// Blocks averaged together in the inspection CNV export.
    #[serde(default)]
    pub crunch_size: Option<usize>,
    pub label_rule: LabelRule,
}

/// Dataset short name → metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatasetCatalog(pub HashMap<String, DatasetMetadata>);

impl DatasetCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open dataset catalog {}", path.display()))?;
        let catalog = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed dataset catalog {}", path.display()))?;
        Ok(catalog)
    }

    /// Metadata of a dataset, looked up by its short name. Unknown keys are fatal for that dataset.
    pub fn get(&self, dataset: &str) -> Result<&DatasetMetadata> {
        let short = short_dataset_name(dataset)?;
        self.0
            .get(&short)
            .ok_or_else(|| anyhow!("unknown dataset key '{short}' (from '{dataset}')"))
    }

    pub fn cell_count_threshold(&self, dataset: &str) -> Result<usize> {
        self.get(dataset)?
            .cell_count_threshold
            .ok_or_else(|| anyhow!("no cell count threshold configured for '{dataset}'"))
    }

    pub fn crunch_size(&self, dataset: &str) -> Result<usize> {
        self.get(dataset)?
            .crunch_size
            .ok_or_else(|| anyhow!("no crunch size configured for '{dataset}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DatasetCatalog {
        serde_json::from_str(
            r#"{
                "Frangieh": {
                    "perturbation_type": "CRISPR-cas9",
                    "cell_count_threshold": 20,
                    "crunch_size": 30,
                    "label_rule": {"kind": "verbatim", "control": "control"}
                },
                "Tian": {
                    "perturbation_type": "CRISPRi",
                    "label_rule": {"kind": "verbatim", "control": "control"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn lookup_by_short_name() {
        let catalog = catalog();
        let meta = catalog.get("FrangiehIzar2021_RNA").unwrap();
        assert_eq!(meta.perturbation_type, "CRISPR-cas9");
        assert_eq!(catalog.cell_count_threshold("FrangiehIzar2021_RNA").unwrap(), 20);
        assert_eq!(catalog.crunch_size("FrangiehIzar2021_RNA").unwrap(), 30);
    }

    #[test]
    fn unknown_dataset_key_fails() {
        let catalog = catalog();
        let err = catalog.get("NormanWeissman2019_filtered").unwrap_err();
        assert!(err.to_string().contains("unknown dataset key 'Norman'"));
        assert!(catalog.cell_count_threshold("TianKampmann2021_CRISPRi").is_err());
    }

    #[test]
    fn cache_path_carries_parameters() {
        let config = PipelineConfig::new("/data", LossParams::default());
        assert_eq!(
            config.loss_table_path("TianKampmann2021_CRISPRi"),
            PathBuf::from("/data/TianKampmann2021_CRISPRi_b5_w100_n150_f0.7_c-0.05.csv")
        );
    }

    #[test]
    fn block_radius_saturates() {
        assert_eq!(LossParams::default().max_block_radius(), 29);
        let tiny = LossParams { neighborhood: 3, ..LossParams::default() };
        assert_eq!(tiny.max_block_radius(), 0);
    }
}
