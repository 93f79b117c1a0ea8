use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{s, Array2, ArrayView1, Axis};
use tracing::debug;

/// Per-cell CNV signal over genomic blocks as produced by CNV inference.
#[derive(Debug, Clone)]
pub struct CnvProfile {
    pub cell_ids: Vec<String>,
    /// `[cell × block]` inferred CNV values.
    pub values: Array2<f64>,
    /// Chromosome → first block index, in genome order.
    pub chr_pos: Vec<(String, usize)>,
}

impl CnvProfile {
    pub fn n_blocks(&self) -> usize {
        self.values.ncols()
    }

    pub fn chr_start_blocks(&self) -> HashMap<String, usize> {
        self.chr_pos.iter().cloned().collect()
    }

    /// Rows reordered to follow `cell_ids`; every requested cell must be present.
    pub fn aligned_to(&self, cell_ids: &[&str]) -> Result<Array2<f64>> {
        let row_of: HashMap<&str, usize> = self
            .cell_ids
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let rows = cell_ids
            .iter()
            .map(|c| {
                row_of
                    .get(c)
                    .copied()
                    .ok_or_else(|| anyhow!("cell '{c}' has no CNV profile"))
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(self.values.select(Axis(0), &rows))
    }

    /// Read `cnv.csv` (`cell_id,<block…>`) and `chr_pos.json` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let cnv_path = dir.join("cnv.csv");
        let mut reader = csv::Reader::from_path(&cnv_path)
            .with_context(|| format!("Cannot open CNV matrix {}", cnv_path.display()))?;
        let n_blocks = reader.headers()?.len().saturating_sub(1);

        let mut cell_ids = Vec::new();
        let mut flat = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != n_blocks + 1 {
                bail!(
                    "{}: row {} has {} fields, expected {}",
                    cnv_path.display(),
                    line + 1,
                    record.len(),
                    n_blocks + 1
                );
            }
            cell_ids.push(record[0].to_string());
            for field in record.iter().skip(1) {
                let v: f64 = field.trim().parse().with_context(|| {
                    format!("{}: bad CNV value '{field}' in row {}", cnv_path.display(), line + 1)
                })?;
                flat.push(v);
            }
        }
        let values = Array2::from_shape_vec((cell_ids.len(), n_blocks), flat)?;

        let pos_path = dir.join("chr_pos.json");
        let file = File::open(&pos_path)
            .with_context(|| format!("Cannot open {}", pos_path.display()))?;
        let chr_pos: Vec<(String, usize)> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed {}", pos_path.display()))?;

        debug!(
            "Loaded CNV matrix {} cells × {} blocks, {} chromosomes",
            cell_ids.len(),
            n_blocks,
            chr_pos.len()
        );
        Ok(Self {
            cell_ids,
            values,
            chr_pos,
        })
    }

    /// Write the profile in the layout read by [`CnvProfile::load`].
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut writer = csv::Writer::from_path(dir.join("cnv.csv"))?;
        let mut header = vec!["cell_id".to_string()];
        header.extend((0..self.n_blocks()).map(|b| b.to_string()));
        writer.write_record(&header)?;
        for (cell, row) in self.cell_ids.iter().zip(self.values.rows()) {
            let mut fields = vec![cell.clone()];
            fields.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&fields)?;
        }
        writer.flush()?;
        std::fs::write(dir.join("chr_pos.json"), serde_json::to_string(&self.chr_pos)?)?;
        Ok(())
    }
}

/// `[cell × block]` flags, true where the CNV value is at or below the loss cutoff.
#[derive(Debug, Clone)]
pub struct LowCnvMatrix(Array2<bool>);

impl LowCnvMatrix {
    pub fn from_cnv_values(values: &Array2<f64>, cnv_cutoff: f64) -> Self {
        Self(values.mapv(|v| v <= cnv_cutoff))
    }

    pub fn from_flags(flags: Array2<bool>) -> Self {
        Self(flags)
    }

    pub fn n_cells(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_blocks(&self) -> usize {
        self.0.ncols()
    }

    /// Per cell, the fraction of blocks `first..=last` that are low.
    pub fn low_fraction(&self, first: usize, last: usize) -> Vec<f64> {
        let width = (last + 1 - first) as f64;
        self.0
            .rows()
            .into_iter()
            .map(|row| window_low_count(row, first, last) as f64 / width)
            .collect()
    }
}

fn window_low_count(row: ArrayView1<bool>, first: usize, last: usize) -> usize {
    row.slice(s![first..=last]).iter().filter(|&&low| low).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn low_flags_include_cutoff() {
        let values = array![[-0.05, 0.0, -0.2], [0.1, -0.06, 0.3]];
        let low = LowCnvMatrix::from_cnv_values(&values, -0.05);
        assert_eq!(low.low_fraction(0, 2), vec![2.0 / 3.0, 1.0 / 3.0]);
        assert_eq!(low.low_fraction(1, 1), vec![0.0, 1.0]);
    }

    #[test]
    fn interior_window_ignores_outer_blocks() {
        let flags = array![
            [true, false, true, true, false, true],
            [false, true, false, false, true, false]
        ];
        let low = LowCnvMatrix::from_flags(flags);
        assert_eq!(low.low_fraction(2, 4), vec![2.0 / 3.0, 1.0 / 3.0]);
        assert_eq!(low.low_fraction(5, 5), vec![1.0, 0.0]);
    }

    #[test]
    fn profile_round_trips_and_aligns() {
        let dir = tempfile::tempdir().unwrap();
        let profile = CnvProfile {
            cell_ids: vec!["a".into(), "b".into()],
            values: array![[0.5, -0.1], [-0.3, 0.0]],
            chr_pos: vec![("1".into(), 0), ("2".into(), 1)],
        };
        profile.save(dir.path()).unwrap();

        let loaded = CnvProfile::load(dir.path()).unwrap();
        assert_eq!(loaded.chr_pos, profile.chr_pos);
        let aligned = loaded.aligned_to(&["b", "a"]).unwrap();
        assert_eq!(aligned, array![[-0.3, 0.0], [0.5, -0.1]]);
        assert!(loaded.aligned_to(&["missing"]).is_err());
    }
}
