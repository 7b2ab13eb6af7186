use crate::utils::parser::parse_window;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "lebail - Le Bail whole-pattern refinement of powder X-ray diffraction data.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refine candidate phases against a measured powder pattern.
    Refine(RefineArgs),
}

/// Arguments for the `refine` subcommand.
#[derive(Args, Debug)]
pub struct RefineArgs {
    // --- Core Arguments ---
    /// Measured pattern: two or three numeric columns (2θ, intensity, optional σ).
    /// Files ending in `.csv` are comma-separated, anything else whitespace-separated.
    #[arg(short = 'i', long, required = true, value_name = "PATH")]
    pub pattern: PathBuf,

    /// Phase cards in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub phases: PathBuf,

    /// Path for the JSON refinement report.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Optional CSV export of the observed, calculated and difference curves.
    #[arg(long, value_name = "PATH")]
    pub profile: Option<PathBuf>,

    /// Refinement configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Refinement Overrides ---
    /// Override the maximum number of refinement iterations.
    #[arg(short = 'n', long, value_name = "INT")]
    pub max_iterations: Option<usize>,

    /// Restrict the fit to an angular window, given as MIN:MAX in degrees 2θ.
    #[arg(short, long, value_name = "MIN:MAX", value_parser = parse_window)]
    pub window: Option<(f64, f64)>,

    /// Refine one bounded intensity multiplier per reflection (Pawley-style).
    #[arg(long)]
    pub independent_intensities: bool,

    /// Free the profile parameters from the first iteration.
    #[arg(long)]
    pub no_staged: bool,

    /// Refine a single zero shift shared by all phases.
    #[arg(long)]
    pub shared_zero_shift: bool,

    /// Estimate each phase's initial scale from the measured pattern.
    #[arg(long)]
    pub estimate_scale: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S solver.max-iterations=100
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}
