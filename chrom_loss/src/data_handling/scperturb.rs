use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::data_handling::labels::{LabelNormalizer, LabelRule, RawObs};
use crate::models::{CellLabel, Dataset, PerturbSeqData};

/// One perturb-seq dataset exported as `obs.csv` + `var.csv` under its own directory.
pub struct ScPerturbDataset {
    pub name: String,
    pub dir: PathBuf,
    pub label_rule: LabelRule,
}

#[derive(Debug, Deserialize)]
struct VarRow {
    gene: String,
}

fn read_obs(path: &Path) -> Result<Vec<RawObs>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open cell table {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.with_context(|| format!("Bad row in {}", path.display()))?);
    }
    Ok(rows)
}

fn read_var(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open gene table {}", path.display()))?;
    let mut genes = Vec::new();
    for record in reader.deserialize() {
        let row: VarRow = record.with_context(|| format!("Bad row in {}", path.display()))?;
        genes.push(row.gene);
    }
    Ok(genes)
}

impl Dataset for ScPerturbDataset {
    fn load(&self) -> Result<PerturbSeqData> {
        info!("Reading dataset {} from {}", self.name, self.dir.display());
        let obs = read_obs(&self.dir.join("obs.csv"))?;
        let genes = read_var(&self.dir.join("var.csv"))?;

        let total = obs.len();
        let cells: Vec<CellLabel> = obs
            .iter()
            .filter_map(|o| {
                let label = self.label_rule.normalize(o);
                if label.perturbation_label.is_empty() {
                    return None;
                }
                Some(CellLabel {
                    cell_id: o.cell_id.clone(),
                    gene: label.gene,
                    perturbation_label: label.perturbation_label,
                })
            })
            .collect();

        debug!(
            "{}: kept {} of {} cells, {} genes",
            self.name,
            cells.len(),
            total,
            genes.len()
        );

        Ok(PerturbSeqData {
            name: self.name.clone(),
            cells,
            genes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn unlabelled_cells_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("obs.csv"),
            "cell_id,perturbation\nc1,CD58\nc2,control\nc3,\n",
        )
        .unwrap();
        fs::write(dir.path().join("var.csv"), "gene\nCD58\nB2M\n").unwrap();

        let dataset = ScPerturbDataset {
            name: "FrangiehIzar2021_RNA".to_string(),
            dir: dir.path().to_path_buf(),
            label_rule: LabelRule::Verbatim { control: "control".into() },
        };
        let data = dataset.load().unwrap();
        assert_eq!(data.genes, vec!["CD58", "B2M"]);
        assert_eq!(data.cell_ids(), vec!["c1", "c2"]);
        assert_eq!(data.cells[1].gene, "");
        assert_eq!(data.cells[1].perturbation_label, "control");
    }
}
