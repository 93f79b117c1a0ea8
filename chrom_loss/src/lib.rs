//! Detection of chromosomal loss at CRISPR cut sites in perturb-seq screens.
//!
//! A CNV profile per cell is thresholded into low blocks, loss is measured in the
//! 5' and 3' neighbourhood of every perturbed gene for every perturbation, and
//! self-pairs that stand out against the other perturbations are reported.

pub mod analysis;
pub mod cnv_inference;
pub mod config;
pub mod data_handling;
pub mod genomic_index;
pub mod helper_functions;
pub mod models;
pub mod pipeline;
