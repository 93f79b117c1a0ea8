//! On-disk form of the per-pair loss table.
//!
//! One CSV row per (affected, perturbing) pair with both directions side by side.
//! Loss cell lists are stored as JSON arrays so they can be read back for inspection.

use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::analysis::chromosomal_loss::LossTable;
use crate::helper_functions::{dataframe_to_csv, read_csv_as_strings};
use crate::models::{polars_err, Direction, DirectionalLoss, LossRecord};

const KO_GENE: &str = "ko_gene";
const AFF_GENE: &str = "aff_gene";
const KO_CHR: &str = "ko_chr";
const KO_ARM: &str = "ko_arm";
const AFF_CHR: &str = "aff_chr";
const AFF_ARM: &str = "aff_arm";

fn cells_col(direction: Direction) -> String {
    format!("loss{}_cells", direction.tag())
}

fn count_col(direction: Direction) -> String {
    format!("loss{}_cellcount", direction.tag())
}

fn frac_col(direction: Direction) -> String {
    format!("loss{}_cellfrac", direction.tag())
}

const COLUMN_DIRECTIONS: [Direction; 2] = [Direction::FivePrime, Direction::ThreePrime];

impl LossTable {
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let recs = &self.records;
        let mut columns: Vec<Column> = vec![
            Column::from(Series::new(
                KO_GENE.into(),
                recs.iter().map(|r| r.ko_gene.clone()).collect::<Vec<_>>(),
            )),
            Column::from(Series::new(
                AFF_GENE.into(),
                recs.iter().map(|r| r.aff_gene.clone()).collect::<Vec<_>>(),
            )),
            Column::from(Series::new(
                KO_CHR.into(),
                recs.iter().map(|r| r.ko_chr.clone()).collect::<Vec<_>>(),
            )),
            Column::from(Series::new(
                KO_ARM.into(),
                recs.iter().map(|r| r.ko_arm.clone()).collect::<Vec<_>>(),
            )),
            Column::from(Series::new(
                AFF_CHR.into(),
                recs.iter().map(|r| r.aff_chr.clone()).collect::<Vec<_>>(),
            )),
            Column::from(Series::new(
                AFF_ARM.into(),
                recs.iter().map(|r| r.aff_arm.clone()).collect::<Vec<_>>(),
            )),
        ];

        for direction in COLUMN_DIRECTIONS {
            let cells = recs
                .iter()
                .map(|r| serde_json::to_string(&r.loss(direction).cells))
                .collect::<Result<Vec<String>, _>>()
                .map_err(|e| polars_err(Box::new(e)))?;
            columns.push(Column::from(Series::new(cells_col(direction).into(), cells)));
        }
        for direction in COLUMN_DIRECTIONS {
            let counts: Vec<u64> = recs
                .iter()
                .map(|r| r.loss(direction).cell_count as u64)
                .collect();
            columns.push(Column::from(Series::new(count_col(direction).into(), counts)));
        }
        for direction in COLUMN_DIRECTIONS {
            let fracs: Vec<Option<f64>> =
                recs.iter().map(|r| r.loss(direction).cell_frac).collect();
            columns.push(Column::from(Series::new(frac_col(direction).into(), fracs)));
        }

        DataFrame::new(columns)
    }

    pub fn from_dataframe(df: &DataFrame) -> PolarsResult<Self> {
        let text = |name: &str| -> PolarsResult<Vec<Option<String>>> {
            let col = df.column(name)?.cast(&DataType::String)?;
            Ok(col
                .str()?
                .into_iter()
                .map(|v| v.filter(|s| !s.is_empty()).map(str::to_string))
                .collect())
        };
        let required = |name: &str| -> PolarsResult<Vec<String>> {
            text(name)?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.ok_or_else(|| {
                        PolarsError::ComputeError(format!("missing {name} in row {row}").into())
                    })
                })
                .collect()
        };
        let directional = |direction: Direction| -> PolarsResult<Vec<DirectionalLoss>> {
            let cells = text(&cells_col(direction))?;
            let counts_col = df.column(&count_col(direction))?.cast(&DataType::Float64)?;
            let fracs_col = df.column(&frac_col(direction))?.cast(&DataType::Float64)?;
            let counts = counts_col.f64()?;
            let fracs = fracs_col.f64()?;

            cells
                .into_iter()
                .zip(counts.into_iter())
                .zip(fracs.into_iter())
                .map(|((cells, count), frac)| -> PolarsResult<DirectionalLoss> {
                    let cells: Vec<String> = match cells {
                        Some(json) => {
                            serde_json::from_str(&json).map_err(|e| polars_err(Box::new(e)))?
                        }
                        None => Vec::new(),
                    };
                    Ok(DirectionalLoss {
                        cells,
                        cell_count: count.unwrap_or(0.0).round() as usize,
                        cell_frac: frac.filter(|f| f.is_finite()),
                    })
                })
                .collect()
        };

        let ko_gene = required(KO_GENE)?;
        let aff_gene = required(AFF_GENE)?;
        let ko_chr = text(KO_CHR)?;
        let ko_arm = text(KO_ARM)?;
        let aff_chr = required(AFF_CHR)?;
        let aff_arm = required(AFF_ARM)?;
        let loss_5p = directional(Direction::FivePrime)?;
        let loss_3p = directional(Direction::ThreePrime)?;

        let mut records = Vec::with_capacity(df.height());
        for (i, (l5, l3)) in loss_5p.into_iter().zip(loss_3p).enumerate() {
            records.push(LossRecord {
                ko_gene: ko_gene[i].clone(),
                aff_gene: aff_gene[i].clone(),
                ko_chr: ko_chr[i].clone(),
                ko_arm: ko_arm[i].clone(),
                aff_chr: aff_chr[i].clone(),
                aff_arm: aff_arm[i].clone(),
                loss_5p: l5,
                loss_3p: l3,
            });
        }
        Ok(LossTable { records })
    }

    pub fn write_csv(&self, path: &Path) -> PolarsResult<()> {
        let mut df = self.to_dataframe()?;
        dataframe_to_csv(&mut df, path)?;
        info!("Wrote {} loss records to {}", self.len(), path.display());
        Ok(())
    }

    pub fn read_csv(path: &Path) -> PolarsResult<Self> {
        let df = read_csv_as_strings(path)?;
        Self::from_dataframe(&df)
    }
}
