//! Gene → block bookkeeping along each chromosome.
//!
//! Genes of a chromosome are ordered by start position and cut into consecutive blocks
//! of `block_size` genes. CNV inference reports the genome-wide index of each
//! chromosome's first block; a gene's block number is that offset plus its rank
//! divided by the block size.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;

use tracing::{debug, warn};

use crate::data_handling::annotation::GeneAnnotations;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneLocus {
    pub gene: String,
    pub chromosome: String,
    pub arm: String,
    pub start: u64,
    /// Genome-wide block index.
    pub block_number: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromosomeBlockRange {
    pub start_block: usize,
    /// Last block holding a gene of this chromosome, inclusive.
    pub end_block: usize,
}

#[derive(Debug, Clone)]
pub struct GenomicIndex {
    genes: HashSet<String>,
    sorted_genes: HashMap<String, Vec<String>>,
    ranges: HashMap<String, ChromosomeBlockRange>,
    loci: HashMap<String, GeneLocus>,
}

impl GenomicIndex {
    /// Build the index over the dataset genes.
    ///
    /// `chr_start_blocks` comes from CNV inference. Every gene with a chromosome and a
    /// start is ranked on its chromosome; only those that also have an arm and sit on a
    /// chromosome with CNV blocks get a locus.
    pub fn build(
        genes: &[String],
        annotations: &GeneAnnotations,
        chr_start_blocks: &HashMap<String, usize>,
        block_size: usize,
    ) -> Self {
        let block_size = block_size.max(1);

        let mut placed: HashMap<String, Vec<(u64, usize, &str, Option<&str>)>> = HashMap::new();
        let mut unplaced = 0usize;
        for (order, gene) in genes.iter().enumerate() {
            let Some(annotation) = annotations.get(gene) else {
                unplaced += 1;
                continue;
            };
            match annotation.position() {
                Some((chromosome, start)) => placed
                    .entry(chromosome.to_string())
                    .or_default()
                    .push((start, order, gene.as_str(), annotation.arm())),
                None => unplaced += 1,
            }
        }
        debug!("{} of {} genes lack chromosome annotation", unplaced, genes.len());

        let mut sorted_genes = HashMap::new();
        let mut ranges = HashMap::new();
        let mut loci = HashMap::new();
        for (chromosome, mut members) in placed {
            members.sort_by_key(|&(start, order, _, _)| (start, order));

            let Some(&start_block) = chr_start_blocks.get(&chromosome) else {
                warn!(
                    "Chromosome {} has no CNV blocks; its {} genes cannot be tested",
                    chromosome,
                    members.len()
                );
                continue;
            };
            ranges.insert(
                chromosome.clone(),
                ChromosomeBlockRange {
                    start_block,
                    end_block: start_block + (members.len() - 1) / block_size,
                },
            );
            for (rank, &(start, _, gene, arm)) in members.iter().enumerate() {
                // Armless genes still take up a rank but cannot center a window.
                let Some(arm) = arm else { continue };
                loci.insert(
                    gene.to_string(),
                    GeneLocus {
                        gene: gene.to_string(),
                        chromosome: chromosome.clone(),
                        arm: arm.to_string(),
                        start,
                        block_number: start_block + rank / block_size,
                    },
                );
            }
            sorted_genes.insert(
                chromosome,
                members.iter().map(|&(_, _, g, _)| g.to_string()).collect(),
            );
        }

        Self {
            genes: genes.iter().cloned().collect(),
            sorted_genes,
            ranges,
            loci,
        }
    }

    /// Whether the gene belongs to the dataset at all, annotated or not.
    pub fn contains(&self, gene: &str) -> bool {
        self.genes.contains(gene)
    }

    pub fn locus(&self, gene: &str) -> Option<&GeneLocus> {
        self.loci.get(gene)
    }

    pub fn chromosome_range(&self, chromosome: &str) -> Option<ChromosomeBlockRange> {
        self.ranges.get(chromosome).copied()
    }

    pub fn sorted_genes(&self, chromosome: &str) -> Option<&[String]> {
        self.sorted_genes.get(chromosome).map(Vec::as_slice)
    }

    /// The 5' and 3' block windows around a locus.
    ///
    /// Each window reaches at most `max_radius` blocks past the locus block and never
    /// leaves the chromosome range nor the `n_blocks` columns of the CNV matrix.
    pub fn neighborhood(
        &self,
        locus: &GeneLocus,
        max_radius: usize,
        n_blocks: usize,
    ) -> Option<(RangeInclusive<usize>, RangeInclusive<usize>)> {
        let range = self.chromosome_range(&locus.chromosome)?;
        let block = locus.block_number;
        if n_blocks == 0 || block >= n_blocks {
            return None;
        }
        let end_block = range.end_block.min(n_blocks - 1);

        let radius_5p = max_radius.min(block - range.start_block);
        let radius_3p = max_radius.min(end_block.saturating_sub(block));
        Some((block - radius_5p..=block, block..=block + radius_3p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::annotation::GeneAnnotation;

    fn annotation(gene: &str, chrom: Option<&str>, arm: &str, start: u64) -> GeneAnnotation {
        GeneAnnotation {
            gene: gene.to_string(),
            chromosome: chrom.map(str::to_string),
            arm: Some(arm.to_string()),
            start: Some(start),
        }
    }

    fn index() -> GenomicIndex {
        // chr1: 12 genes given in reverse start order, chr2: 3 genes, plus one orphan
        let mut rows = Vec::new();
        let mut genes = Vec::new();
        for i in 0..12u64 {
            let g = format!("A{i}");
            rows.push(annotation(&g, Some("1"), if i < 6 { "1p" } else { "1q" }, 1_000 - i * 10));
            genes.push(g);
        }
        for i in 0..3u64 {
            let g = format!("B{i}");
            rows.push(annotation(&g, Some("2"), "2p", 100 + i));
            genes.push(g);
        }
        rows.push(annotation("ORPHAN", None, "", 0));
        genes.push("ORPHAN".to_string());

        let chr_pos: HashMap<String, usize> =
            [("1".to_string(), 0), ("2".to_string(), 3)].into_iter().collect();
        GenomicIndex::build(&genes, &GeneAnnotations::from_rows(rows), &chr_pos, 5)
    }

    #[test]
    fn genes_sorted_by_start_and_blocked() {
        let idx = index();
        let chr1 = idx.sorted_genes("1").unwrap();
        assert_eq!(chr1.first().unwrap(), "A11");
        assert_eq!(chr1.last().unwrap(), "A0");

        // A11 is rank 0, A6 rank 5, A0 rank 11
        assert_eq!(idx.locus("A11").unwrap().block_number, 0);
        assert_eq!(idx.locus("A6").unwrap().block_number, 1);
        assert_eq!(idx.locus("A0").unwrap().block_number, 2);
        assert_eq!(idx.locus("B2").unwrap().block_number, 3);

        assert_eq!(
            idx.chromosome_range("1"),
            Some(ChromosomeBlockRange { start_block: 0, end_block: 2 })
        );
        assert_eq!(
            idx.chromosome_range("2"),
            Some(ChromosomeBlockRange { start_block: 3, end_block: 3 })
        );
    }

    #[test]
    fn end_block_does_not_reach_next_chromosome() {
        let rows = (0..10u64).map(|i| GeneAnnotation {
            gene: format!("G{i}"),
            chromosome: Some("1".into()),
            arm: Some("1p".into()),
            start: Some(i),
        });
        let genes: Vec<String> = (0..10).map(|i| format!("G{i}")).collect();
        let chr_pos: HashMap<String, usize> =
            [("1".to_string(), 0), ("2".to_string(), 2)].into_iter().collect();
        let idx = GenomicIndex::build(&genes, &GeneAnnotations::from_rows(rows), &chr_pos, 5);
        assert_eq!(
            idx.chromosome_range("1"),
            Some(ChromosomeBlockRange { start_block: 0, end_block: 1 })
        );
        let (_, w3) = idx.neighborhood(idx.locus("G0").unwrap(), 29, 4).unwrap();
        assert_eq!(w3, 0..=1);
    }

    #[test]
    fn armless_gene_keeps_its_rank() {
        let rows = (0..10u64).map(|i| GeneAnnotation {
            gene: format!("G{i}"),
            chromosome: Some("1".into()),
            arm: if i == 0 { None } else { Some("1q".into()) },
            start: Some(i),
        });
        let genes: Vec<String> = (0..10).map(|i| format!("G{i}")).collect();
        let chr_pos: HashMap<String, usize> = [("1".to_string(), 0)].into_iter().collect();
        let idx = GenomicIndex::build(&genes, &GeneAnnotations::from_rows(rows), &chr_pos, 5);

        assert_eq!(idx.sorted_genes("1").unwrap().len(), 10);
        assert!(idx.locus("G0").is_none());
        assert_eq!(idx.locus("G4").unwrap().block_number, 0);
        assert_eq!(idx.locus("G5").unwrap().block_number, 1);
        assert_eq!(
            idx.chromosome_range("1"),
            Some(ChromosomeBlockRange { start_block: 0, end_block: 1 })
        );
    }

    #[test]
    fn unannotated_genes_have_no_locus_but_are_known() {
        let idx = index();
        assert!(idx.locus("ORPHAN").is_none());
        assert!(idx.contains("ORPHAN"));
        assert!(!idx.contains("NOT_IN_DATASET"));
    }

    #[test]
    fn windows_stay_inside_chromosome() {
        let idx = index();
        let n_blocks = 4;
        for gene in ["A11", "A6", "A0", "B0", "B2"] {
            let locus = idx.locus(gene).unwrap();
            let range = idx.chromosome_range(&locus.chromosome).unwrap();
            for radius in [0, 1, 29] {
                let (w5, w3) = idx.neighborhood(locus, radius, n_blocks).unwrap();
                for w in [&w5, &w3] {
                    assert!(*w.start() >= range.start_block);
                    assert!(*w.end() <= range.end_block);
                    assert!(*w.end() < n_blocks);
                    assert!(w.contains(&locus.block_number));
                    assert!(w.end() - w.start() <= radius);
                }
            }
        }

        let (w5, w3) = idx.neighborhood(idx.locus("A6").unwrap(), 29, n_blocks).unwrap();
        assert_eq!(w5, 0..=1);
        assert_eq!(w3, 1..=2);
    }
}
