use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chrom_loss::cnv_inference::{CnvInference, ExternalCnvInference, PrecomputedCnv};
use chrom_loss::config::{DatasetCatalog, LossParams, PipelineConfig};
use chrom_loss::data_handling::annotation::GeneAnnotations;
use chrom_loss::helper_functions::project_root;
use chrom_loss::pipeline::Pipeline;

const DEFAULT_DATASETS: [&str; 5] = [
    "FrangiehIzar2021_RNA",
    "PapalexiSatija2021_eccite_RNA",
    "ReplogleWeissman2022_rpe1",
    "TianKampmann2021_CRISPRi",
    "AdamsonWeissman2016_GSM2406681_10X010",
];

#[derive(Parser)]
#[command(
    name = "chrom_loss",
    version,
    about = "Chromosomal loss at CRISPR cut sites in perturb-seq screens",
    long_about = None,
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute (or reuse) the per-pair loss table of each dataset
    ComputeLoss {
        /// Dataset names; defaults to the five scPerturb screens
        datasets: Vec<String>,
    },
    /// Score specific loss and write the specific-loss and summary tables
    Report { datasets: Vec<String> },
    /// Export loss/non-loss cells and block-reduced CNV rows of well-supported hits
    Inspect { datasets: Vec<String> },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CnvSource {
    /// Read `<cnv-dir>/<dataset>/cnv.csv` and `chr_pos.json`
    Precomputed,
    /// Run the infercnvpy helper script
    Script,
}

#[derive(Args)]
struct CommonArgs {
    /// Directory holding datasets and all outputs [default: <project root>/data]
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Dataset catalog (JSON) [default: <project root>/config/datasets.json]
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Gene annotation table (TSV) [default: <data dir>/chromosome_info.tsv]
    #[arg(long, global = true)]
    annotation: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = CnvSource::Precomputed, global = true)]
    cnv_source: CnvSource,

    /// Precomputed CNV profiles [default: <data dir>/cnv]
    #[arg(long, global = true)]
    cnv_dir: Option<PathBuf>,

    /// Python interpreter for the helper script [default: python3 on PATH]
    #[arg(long, global = true)]
    python: Option<PathBuf>,

    /// CNV helper script [default: <project root>/scripts/infer_cnv.py]
    #[arg(long, global = true)]
    script: Option<PathBuf>,

    /// Genes per block
    #[arg(long, default_value_t = 5, global = true)]
    block_size: usize,

    /// CNV inference window size
    #[arg(long, default_value_t = 100, global = true)]
    window_size: usize,

    /// Genes considered on each side of a cut site
    #[arg(long, default_value_t = 150, global = true)]
    neighborhood: usize,

    /// Minimum fraction of low blocks for a cell to count as lost
    #[arg(long, default_value_t = 0.7, global = true)]
    frac_cutoff: f64,

    /// CNV value at or below which a block is low
    #[arg(long, default_value_t = -0.05, allow_hyphen_values = true, global = true)]
    cnv_cutoff: f64,

    #[arg(long, default_value_t = 3.0, global = true)]
    zscore_cutoff: f64,

    /// Recompute loss tables even if cached
    #[arg(long, global = true)]
    force: bool,
}

impl CommonArgs {
    fn params(&self) -> LossParams {
        LossParams {
            block_size: self.block_size,
            window_size: self.window_size,
            neighborhood: self.neighborhood,
            frac_cutoff: self.frac_cutoff,
            cnv_cutoff: self.cnv_cutoff,
            zscore_cutoff: self.zscore_cutoff,
        }
    }
}

fn datasets_or_default(datasets: &[String]) -> Vec<String> {
    if datasets.is_empty() {
        DEFAULT_DATASETS.iter().map(|d| d.to_string()).collect()
    } else {
        datasets.to_vec()
    }
}

fn run<C: CnvInference>(pipeline: Pipeline<C>, command: &Commands) -> Result<()> {
    match command {
        Commands::ComputeLoss { datasets } => {
            let written = pipeline.compute_loss_tables(&datasets_or_default(datasets));
            for (dataset, path) in written {
                info!("{}: loss table at {}", dataset, path.display());
            }
        }
        Commands::Report { datasets } => {
            let report =
                pipeline.generate_specific_loss_and_summary_tables(&datasets_or_default(datasets))?;
            for row in report.summary() {
                info!(
                    "{} {} {}: {}/{} targets with specific loss ({}%)",
                    row.perturbation_type,
                    row.dataset,
                    row.direction,
                    row.specific_targets,
                    row.tested_targets,
                    row.specific_pct
                );
            }
        }
        Commands::Inspect { datasets } => {
            for dataset in datasets_or_default(datasets) {
                if let Err(e) = pipeline.inspect(&dataset) {
                    error!("Inspection of {} failed: {:#}", dataset, e);
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let args = &cli.common;
    let root = project_root();

    let data_dir = args.data_dir.clone().unwrap_or_else(|| root.join("data"));
    let catalog_path = args
        .catalog
        .clone()
        .unwrap_or_else(|| root.join("config").join("datasets.json"));
    let annotation_path = args
        .annotation
        .clone()
        .unwrap_or_else(|| data_dir.join("chromosome_info.tsv"));

    let mut config = PipelineConfig::new(&data_dir, args.params());
    config.force = args.force;
    let catalog = DatasetCatalog::load(&catalog_path)?;
    let annotations = GeneAnnotations::load(&annotation_path)?;
    info!(
        "Data in {}, {} catalogued datasets, {} annotated genes",
        data_dir.display(),
        catalog.0.len(),
        annotations.len()
    );

    match args.cnv_source {
        CnvSource::Precomputed => {
            let cnv = PrecomputedCnv {
                dir: args.cnv_dir.clone().unwrap_or_else(|| data_dir.join("cnv")),
            };
            run(Pipeline::new(config, catalog, annotations, cnv), &cli.command)
        }
        CnvSource::Script => {
            let cnv = ExternalCnvInference {
                python: args.python.clone(),
                script: args
                    .script
                    .clone()
                    .unwrap_or_else(|| root.join("scripts").join("infer_cnv.py")),
                data_dir: data_dir.clone(),
                annotation: annotation_path.clone(),
            };
            run(Pipeline::new(config, catalog, annotations, cnv), &cli.command)
        }
    }
}
