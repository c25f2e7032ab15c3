use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

pub mod commands;
pub mod output;

#[derive(Parser)]
#[command(
    name = "ncov-deploy",
    version,
    about = "Package the nCoV statistics dashboard for App Engine and deploy it"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Path to config file (default: .ncov-deploy/deploy.toml or ncov-deploy.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root (default: current directory)
    #[arg(short = 'C', long, global = true)]
    pub project: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble the deployment directory
    Package {
        /// Show what would be done without touching the filesystem
        #[arg(long)]
        dry_run: bool,
    },

    /// Package, then run the cloud deploy command from the output directory
    Deploy {
        /// Package and show the deploy command without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Strip hash pins from a requirements file
    Sanitize {
        /// Input file, `-` or absent for stdin
        input: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Token marking hash-verification lines
        #[arg(long, default_value = crate::requirements::DEFAULT_HASH_MARKER)]
        marker: String,
        /// Exit with status 1 if the input still carries hash pins
        #[arg(long, conflicts_with = "output")]
        check: bool,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Compact,
}

impl Cli {
    /// Log filter implied by `-q`/`-v` when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}
