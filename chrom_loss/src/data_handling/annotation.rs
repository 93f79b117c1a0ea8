use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

/// Genomic annotation of one gene; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GeneAnnotation {
    pub gene: String,
    #[serde(rename = "chrom", default)]
    pub chromosome: Option<String>,
    #[serde(default)]
    pub arm: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
}

impl GeneAnnotation {
    /// Chromosome and start when both are known; enough to rank the gene along its chromosome.
    pub fn position(&self) -> Option<(&str, u64)> {
        match (&self.chromosome, self.start) {
            (Some(c), Some(s)) if !c.is_empty() => Some((c.as_str(), s)),
            _ => None,
        }
    }

    pub fn arm(&self) -> Option<&str> {
        self.arm.as_deref().filter(|a| !a.is_empty())
    }
}

/// Gene symbol → annotation.
#[derive(Debug, Clone, Default)]
pub struct GeneAnnotations(HashMap<String, GeneAnnotation>);

impl GeneAnnotations {
    /// Read a tab separated table with `gene`, `chrom`, `arm` and `start` columns.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading gene annotations from {}", path.display());
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("Cannot open gene annotation table {}", path.display()))?;

        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let row: GeneAnnotation =
                record.with_context(|| format!("Bad row in {}", path.display()))?;
            rows.push(row);
        }
        debug!("Loaded {} gene annotations", rows.len());
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: impl IntoIterator<Item = GeneAnnotation>) -> Self {
        Self(rows.into_iter().map(|a| (a.gene.clone(), a)).collect())
    }

    pub fn get(&self, gene: &str) -> Option<&GeneAnnotation> {
        self.0.get(gene)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
