//! Per-dataset rules turning raw perturbation annotations into a perturbed gene and a
//! reference label for CNV inference.

use serde::{Deserialize, Serialize};

use crate::config::CONTROL_LABEL;

/// Raw per-cell annotation as found in a dataset's `obs.csv`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawObs {
    pub cell_id: String,
    #[serde(default)]
    pub perturbation: Option<String>,
    #[serde(default)]
    pub gene: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLabel {
    /// Perturbed gene; empty when the cell carries no gene perturbation.
    pub gene: String,
    /// "control" for reference cells, the gene otherwise; empty cells are dropped.
    pub perturbation_label: String,
}

pub trait LabelNormalizer {
    fn normalize(&self, obs: &RawObs) -> NormalizedLabel;
}

/// Label parsing strategies, chosen per dataset through the catalog.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelRule {
    /// Gene is the text before the first delimiter; cells without a perturbation are controls.
    SplitPrefix { delimiter: String },
    /// Controls carry the control value; other perturbations are split like `SplitPrefix`.
    SplitUnlessControl { delimiter: String, control: String },
    /// The perturbation is the gene, except for the control value.
    Verbatim { control: String },
    /// The gene comes from a dedicated column, with a non-targeting sentinel.
    GeneColumn { non_targeting: String, control: String },
}

fn prefix<'a>(value: &'a str, delimiter: &str) -> &'a str {
    value.split(delimiter).next().unwrap_or("")
}

fn labelled(gene: String, is_control: bool) -> NormalizedLabel {
    let perturbation_label = if is_control {
        CONTROL_LABEL.to_string()
    } else {
        gene.clone()
    };
    NormalizedLabel {
        gene,
        perturbation_label,
    }
}

impl LabelNormalizer for LabelRule {
    fn normalize(&self, obs: &RawObs) -> NormalizedLabel {
        let perturbation = obs.perturbation.as_deref();
        match self {
            LabelRule::SplitPrefix { delimiter } => {
                let gene = perturbation
                    .map(|p| prefix(p, delimiter).to_string())
                    .unwrap_or_default();
                labelled(gene, perturbation.is_none())
            }
            LabelRule::SplitUnlessControl { delimiter, control } => {
                let is_control = perturbation == Some(control.as_str());
                let gene = match perturbation {
                    Some(p) if !is_control => prefix(p, delimiter).to_string(),
                    _ => String::new(),
                };
                labelled(gene, is_control)
            }
            LabelRule::Verbatim { control } => {
                let is_control = perturbation == Some(control.as_str());
                let gene = match perturbation {
                    Some(p) if !is_control => p.to_string(),
                    _ => String::new(),
                };
                labelled(gene, is_control)
            }
            LabelRule::GeneColumn {
                non_targeting,
                control,
            } => {
                let gene = match obs.gene.as_deref() {
                    Some(g) if g != non_targeting => g.to_string(),
                    _ => String::new(),
                };
                labelled(gene, perturbation == Some(control.as_str()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(perturbation: Option<&str>, gene: Option<&str>) -> RawObs {
        RawObs {
            cell_id: "c1".to_string(),
            perturbation: perturbation.map(str::to_string),
            gene: gene.map(str::to_string),
        }
    }

    #[test]
    fn split_prefix_marks_missing_as_control() {
        let rule = LabelRule::SplitPrefix { delimiter: "_".into() };
        let l = rule.normalize(&obs(Some("SPI1_pDS255"), None));
        assert_eq!(l.gene, "SPI1");
        assert_eq!(l.perturbation_label, "SPI1");

        let l = rule.normalize(&obs(None, None));
        assert_eq!(l.gene, "");
        assert_eq!(l.perturbation_label, "control");
    }

    #[test]
    fn split_unless_control() {
        let rule = LabelRule::SplitUnlessControl {
            delimiter: "g".into(),
            control: "control".into(),
        };
        assert_eq!(rule.normalize(&obs(Some("IRF1g2"), None)).gene, "IRF1");
        let ctrl = rule.normalize(&obs(Some("control"), None));
        assert_eq!(ctrl.gene, "");
        assert_eq!(ctrl.perturbation_label, "control");
        let missing = rule.normalize(&obs(None, None));
        assert_eq!(missing.perturbation_label, "");
    }

    #[test]
    fn verbatim_and_gene_column() {
        let rule = LabelRule::Verbatim { control: "control".into() };
        assert_eq!(rule.normalize(&obs(Some("CD58"), None)).perturbation_label, "CD58");
        assert_eq!(rule.normalize(&obs(Some("control"), None)).perturbation_label, "control");

        let rule = LabelRule::GeneColumn {
            non_targeting: "non-targeting".into(),
            control: "control".into(),
        };
        let nt = rule.normalize(&obs(Some("control"), Some("non-targeting")));
        assert_eq!(nt.gene, "");
        assert_eq!(nt.perturbation_label, "control");
        let ko = rule.normalize(&obs(Some("1234_POLR2A_P1"), Some("POLR2A")));
        assert_eq!(ko.gene, "POLR2A");
        assert_eq!(ko.perturbation_label, "POLR2A");
    }

    #[test]
    fn rules_deserialize_from_catalog_json() {
        let rule: LabelRule =
            serde_json::from_str(r#"{"kind": "split_prefix", "delimiter": "_"}"#).unwrap();
        assert_eq!(rule, LabelRule::SplitPrefix { delimiter: "_".into() });
    }
}
