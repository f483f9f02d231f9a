//! # cmr-compare
//!
//! Compares two readers' cardiac MR contour annotations.
//!
//! ```bash
//! cmr-compare analyze --case1 <reader1.json> --case2 <reader2.json> --out <slices.csv>
//! cmr-compare cohort --pairs <dir> --out <dir>
//! ```
//!
//! A cohort directory holds one sub-directory per case with one persisted
//! case file per reader (`<dir>/<case>/<reader>.json`).

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cmr_compare::io::cohort::{load_cohort, load_comparison};
use cmr_compare::io::output::{write_report, write_slice_table, CsvFormat};
use cmr_compare::{AnalysisConfig, CohortJob};

#[derive(Parser, Debug)]
#[command(name = "cmr-compare")]
#[command(about = "Inter-reader agreement of cardiac MR contour annotations")]
struct CliArgs {
    /// Log filter, e.g. `info` or `cmr_compare=debug`
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// TOML analysis configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides of the configuration file.
#[derive(Args, Debug)]
struct AnalysisArgs {
    /// View to compare in, e.g. "SAX CINE" or "SAX T1 MAP"
    #[arg(long)]
    view: Option<String>,

    /// Compare each reader at its own phase instead of reader 1's
    #[arg(long)]
    independent_phases: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Per-slice comparison table of one case pair
    Analyze {
        #[arg(long)]
        case1: PathBuf,
        #[arg(long)]
        case2: PathBuf,
        /// Output CSV file
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Cohort statistics over a directory of case pairs
    Cohort {
        #[arg(long)]
        pairs: PathBuf,
        /// Output directory for the summary tables
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&PathBuf>, overrides: &AnalysisArgs) -> Result<AnalysisConfig> {
    let mut config = match path {
        Some(p) => AnalysisConfig::from_file(p)?,
        None => AnalysisConfig::default(),
    };
    if let Some(view) = &overrides.view {
        config.view = view.clone();
    }
    if overrides.independent_phases {
        config.fixed_phase_first_reader = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    match args.command {
        Commands::Analyze {
            case1,
            case2,
            out,
            analysis,
        } => {
            let config = load_config(args.config.as_ref(), &analysis)?;
            let comparison = load_comparison(&case1, &case2, config.view()?)?;
            let rows = comparison.slice_table(config.fixed_phase_first_reader)?;
            let file = File::create(&out).with_context(|| format!("failed to create output file {:?}", out))?;
            write_slice_table(file, rows, &CsvFormat::from_config(&config.csv)?)?;
            info!(rows = rows.len(), out = ?out, "slice table written");
        }
        Commands::Cohort {
            pairs,
            out,
            analysis,
        } => {
            let config = load_config(args.config.as_ref(), &analysis)?;
            let (comparisons, load_failures) = load_cohort(&pairs, config.view()?)?;
            let csv = config.csv.clone();
            let mut report = CohortJob::spawn(comparisons, config)?.wait()?;
            report.failed.extend(load_failures);
            write_report(&out, &report, &csv)?;
            for failed in &report.failed {
                warn!(
                    case = %failed.case_name,
                    reader1 = %failed.reader1,
                    reader2 = %failed.reader2,
                    error = %failed.error,
                    "case left out of the statistics"
                );
            }
            info!(
                cases = report.cases.len(),
                failed = report.failed.len(),
                out = ?out,
                "cohort report written"
            );
        }
    }
    Ok(())
}
