//! Source of per-cell CNV profiles.
//!
//! Inference itself happens outside this crate; implementations either drive the
//! helper script or read profiles that were produced earlier.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info};

use crate::config::{LossParams, CONTROL_LABEL, REFERENCE_KEY};
use crate::data_handling::cnv_matrix::CnvProfile;
use crate::models::PerturbSeqData;

#[derive(Debug, Clone, PartialEq)]
pub struct CnvParams {
    pub window_size: usize,
    /// Genes per output block.
    pub step: usize,
    pub reference_key: String,
    pub reference_cat: String,
}

impl CnvParams {
    pub fn from_loss_params(params: &LossParams) -> Self {
        Self {
            window_size: params.window_size,
            step: params.block_size,
            reference_key: REFERENCE_KEY.to_string(),
            reference_cat: CONTROL_LABEL.to_string(),
        }
    }
}

pub trait CnvInference {
    /// CNV profile for the cells of `data`, referenced against its control cells.
    fn infer(&self, data: &PerturbSeqData, params: &CnvParams) -> Result<CnvProfile>;
}

/// Runs the Python helper around infercnvpy.
///
/// The helper gets the expression file `<data_dir>/<dataset>.h5ad`, the gene
/// annotation and a `labels.csv` of the cells to use, and writes `cnv.csv` plus
/// `chr_pos.json` into an output directory.
#[derive(Debug, Clone)]
pub struct ExternalCnvInference {
    /// Interpreter; `python3` from `PATH` when unset.
    pub python: Option<PathBuf>,
    pub script: PathBuf,
    pub data_dir: PathBuf,
    pub annotation: PathBuf,
}

impl ExternalCnvInference {
    fn python(&self) -> Result<PathBuf> {
        match &self.python {
            Some(p) => Ok(p.clone()),
            None => which::which("python3").context("python3 not found on PATH"),
        }
    }
}

fn write_labels(data: &PerturbSeqData, reference_key: &str, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(["cell_id", reference_key])?;
    for cell in &data.cells {
        writer.write_record([cell.cell_id.as_str(), cell.perturbation_label.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

impl CnvInference for ExternalCnvInference {
    fn infer(&self, data: &PerturbSeqData, params: &CnvParams) -> Result<CnvProfile> {
        let workdir = tempfile::tempdir()?;
        let labels = workdir.path().join("labels.csv");
        let out_dir = workdir.path().join("cnv");
        write_labels(data, &params.reference_key, &labels)?;

        let python = self.python()?;
        let h5ad = self.data_dir.join(format!("{}.h5ad", data.name));
        info!(
            "Running CNV inference for {} ({} cells, window {}, step {})",
            data.name,
            data.cells.len(),
            params.window_size,
            params.step
        );

        let mut cmd = Command::new(&python);
        cmd.arg(&self.script)
            .arg("--h5ad")
            .arg(&h5ad)
            .arg("--annotation")
            .arg(&self.annotation)
            .arg("--labels")
            .arg(&labels)
            .arg("--reference-key")
            .arg(&params.reference_key)
            .arg("--reference-cat")
            .arg(&params.reference_cat)
            .arg("--window-size")
            .arg(params.window_size.to_string())
            .arg("--step")
            .arg(params.step.to_string())
            .arg("--out-dir")
            .arg(&out_dir);

        debug!("About to spawn: {:?}", cmd);
        let output = cmd
            .output()
            .with_context(|| format!("Cannot run {}", python.display()))?;
        if !output.status.success() {
            error!(
                "CNV inference failed. Stderr:\n{}",
                String::from_utf8_lossy(&output.stderr)
            );
            bail!("CNV inference for {} exited with {}", data.name, output.status);
        }
        debug!("CNV inference stdout:\n{}", String::from_utf8_lossy(&output.stdout));

        CnvProfile::load(&out_dir)
    }
}

/// Profiles computed beforehand, one directory per dataset under `dir`.
#[derive(Debug, Clone)]
pub struct PrecomputedCnv {
    pub dir: PathBuf,
}

impl CnvInference for PrecomputedCnv {
    fn infer(&self, data: &PerturbSeqData, _params: &CnvParams) -> Result<CnvProfile> {
        let dir = self.dir.join(&data.name);
        info!("Reading precomputed CNV profile from {}", dir.display());
        CnvProfile::load(&dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellLabel;
    use ndarray::array;

    fn data() -> PerturbSeqData {
        PerturbSeqData {
            name: "TianKampmann2021_CRISPRi".into(),
            cells: vec![
                CellLabel {
                    cell_id: "c1".into(),
                    gene: "A".into(),
                    perturbation_label: "A".into(),
                },
                CellLabel {
                    cell_id: "c2".into(),
                    gene: String::new(),
                    perturbation_label: "control".into(),
                },
            ],
            genes: vec!["A".into()],
        }
    }

    #[test]
    fn params_follow_loss_params() {
        let params = CnvParams::from_loss_params(&LossParams::default());
        assert_eq!(params.step, 5);
        assert_eq!(params.window_size, 100);
        assert_eq!(params.reference_key, "perturbation_label");
        assert_eq!(params.reference_cat, "control");
    }

    #[test]
    fn labels_file_lists_every_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        write_labels(&data(), "perturbation_label", &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "cell_id,perturbation_label\nc1,A\nc2,control\n");
    }

    #[test]
    fn precomputed_profiles_are_read_per_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let profile = CnvProfile {
            cell_ids: vec!["c1".into(), "c2".into()],
            values: array![[-0.1], [0.0]],
            chr_pos: vec![("1".into(), 0)],
        };
        profile.save(&dir.path().join("TianKampmann2021_CRISPRi")).unwrap();

        let source = PrecomputedCnv { dir: dir.path().to_path_buf() };
        let params = CnvParams::from_loss_params(&LossParams::default());
        let loaded = source.infer(&data(), &params).unwrap();
        assert_eq!(loaded.cell_ids, profile.cell_ids);
        assert_eq!(loaded.values, profile.values);
    }

    #[test]
    fn failing_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.py");
        std::fs::write(&script, "import sys\nsys.exit(3)\n").unwrap();
        let Ok(python) = which::which("python3") else {
            return;
        };
        let source = ExternalCnvInference {
            python: Some(python),
            script,
            data_dir: dir.path().to_path_buf(),
            annotation: dir.path().join("chromosome_info.tsv"),
        };
        let params = CnvParams::from_loss_params(&LossParams::default());
        assert!(source.infer(&data(), &params).is_err());
    }
}
