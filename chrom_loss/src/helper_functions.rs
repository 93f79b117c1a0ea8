use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use polars::prelude::*;
use regex::Regex;

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

/// Read every column as a string column; callers cast what they need.
///
/// Chromosome names such as `1` or `X` would otherwise be inferred inconsistently.
pub fn read_csv_as_strings(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(df)
}

/// Short dataset name: the first capitalised word of the file stem.
///
/// `PapalexiSatija2021_eccite_RNA` → `Papalexi`.
pub fn short_dataset_name(dataset: &str) -> Result<String> {
    let re = Regex::new(r"[A-Z][^A-Z]*")?;
    match re.find(dataset) {
        Some(m) => Ok(m.as_str().to_string()),
        None => bail!("unknown dataset key: no capitalised short name in '{dataset}'"),
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
