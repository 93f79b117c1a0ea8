//! Which genes lose their own locus more than other perturbations do.
//!
//! For each affected gene the loss fractions of all perturbing genes form a group;
//! the self-pair is specific when its z-score within that group passes the cutoff.

use std::collections::HashMap;

use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::analysis::chromosomal_loss::LossTable;
use crate::models::{Direction, LossRecord, SpecificLossEntry};

/// Z-scores with the group's own mean and population standard deviation.
///
/// `None` when the group has fewer than two values or no spread; such a group
/// cannot single out any member.
pub fn zscores(values: &[f64]) -> Option<Vec<f64>> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().mean();
    let std = values.iter().population_std_dev();
    if !mean.is_finite() || !std.is_finite() || std <= f64::EPSILON * mean.abs().max(1.0) {
        return None;
    }
    Some(values.iter().map(|v| (v - mean) / std).collect())
}

/// Z-score of the self-pair of one affected gene, if it is defined.
fn self_pair_zscore(group: &[&LossRecord], direction: Direction) -> Option<(usize, f64)> {
    let defined: Vec<(usize, f64)> = group
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.loss(direction).cell_frac.map(|f| (i, f)))
        .collect();
    let values: Vec<f64> = defined.iter().map(|&(_, f)| f).collect();
    let z = zscores(&values)?;
    defined
        .iter()
        .zip(z)
        .find(|((i, _), _)| group[*i].is_self_pair())
        .map(|(&(i, _), z)| (i, z))
}

/// Genes whose loss in `direction` is specific to their own perturbation, ascending by z-score.
pub fn score_specificity(
    table: &LossTable,
    direction: Direction,
    zscore_cutoff: f64,
) -> Vec<SpecificLossEntry> {
    let mut groups: HashMap<&str, Vec<&LossRecord>> = HashMap::new();
    for record in &table.records {
        groups.entry(record.aff_gene.as_str()).or_default().push(record);
    }

    let mut undefined = 0usize;
    let mut hits: Vec<SpecificLossEntry> = Vec::new();
    for (gene, group) in &groups {
        let Some((i, z)) = self_pair_zscore(group, direction) else {
            undefined += 1;
            continue;
        };
        let loss = group[i].loss(direction);
        if loss.cell_count >= 1 && z >= zscore_cutoff {
            hits.push(SpecificLossEntry {
                gene: gene.to_string(),
                direction,
                zscore: z,
                cell_count: loss.cell_count,
                cell_frac: loss.cell_frac.unwrap_or(0.0),
            });
        }
    }
    hits.sort_by(|a, b| a.zscore.total_cmp(&b.zscore).then_with(|| a.gene.cmp(&b.gene)));

    debug!(
        "{}: {} affected genes without a defined self-pair z-score",
        direction, undefined
    );
    info!(
        "{} of {} targets show specific {} loss (z ≥ {})",
        hits.len(),
        groups.len(),
        direction,
        zscore_cutoff
    );
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::chromosomal_loss::compute_chromosomal_loss;
    use crate::analysis::chromosomal_loss::tests::toy_dataset;
    use crate::config::LossParams;
    use crate::models::DirectionalLoss;

    fn record(ko: &str, aff: &str, count: usize, frac: Option<f64>) -> LossRecord {
        let loss = DirectionalLoss {
            cells: (0..count).map(|c| format!("{ko}_{c}")).collect(),
            cell_count: count,
            cell_frac: frac,
        };
        LossRecord {
            ko_gene: ko.to_string(),
            aff_gene: aff.to_string(),
            ko_chr: Some("1".into()),
            ko_arm: Some("1p".into()),
            aff_chr: "1".into(),
            aff_arm: "1p".into(),
            loss_5p: loss.clone(),
            loss_3p: loss,
        }
    }

    #[test]
    fn zscores_are_standardised() {
        let values = [0.1, 0.4, 0.0, 0.9, 0.25, 0.3];
        let z = zscores(&values).unwrap();
        let mean = z.iter().sum::<f64>() / z.len() as f64;
        let var = z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / z.len() as f64;
        assert!(mean.abs() < 1e-12);
        assert!((var.sqrt() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_variance_is_not_specific() {
        assert!(zscores(&[0.0, 0.0, 0.0]).is_none());
        assert!(zscores(&[0.3]).is_none());

        let table = LossTable {
            records: vec![
                record("A", "A", 0, Some(0.0)),
                record("B", "A", 0, Some(0.0)),
                record("C", "A", 0, Some(0.0)),
            ],
        };
        assert!(score_specificity(&table, Direction::FivePrime, 3.0).is_empty());
    }

    #[test]
    fn undefined_fractions_are_left_out_of_the_group() {
        let mut records = vec![record("A", "A", 5, Some(1.0))];
        for ko in ["B", "C", "D", "E", "F", "G", "H", "I", "J", "K"] {
            records.push(record(ko, "A", 0, Some(0.0)));
        }
        records.push(record("EMPTY", "A", 0, None));
        let table = LossTable { records };

        let hits = score_specificity(&table, Direction::ThreePrime, 3.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].gene, "A");
        assert!((hits[0].zscore - 10f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn self_pair_needs_affected_cells() {
        // Highest fraction but no cells cannot happen in real data; guard anyway.
        let mut records = vec![record("A", "A", 0, Some(1.0))];
        for ko in ["B", "C", "D", "E", "F", "G", "H", "I", "J", "K"] {
            records.push(record(ko, "A", 0, Some(0.0)));
        }
        let table = LossTable { records };
        assert!(score_specificity(&table, Direction::FivePrime, 3.0).is_empty());
    }

    #[test]
    fn toy_dataset_singles_out_g1() {
        let (matrix, assignment, index) = toy_dataset();
        let table = compute_chromosomal_loss(&matrix, &assignment, &index, &LossParams::default())
            .unwrap();
        for direction in Direction::REPORT_ORDER {
            let hits = score_specificity(&table, direction, 3.0);
            assert_eq!(hits.len(), 1, "{direction}");
            assert_eq!(hits[0].gene, "G1");
            assert!(hits[0].zscore > 3.0);
            assert_eq!(hits[0].cell_frac, 1.0);
        }
    }
}
