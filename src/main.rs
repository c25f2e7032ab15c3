use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use ncov_deploy::cli::commands::{self, emit};
use ncov_deploy::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level());

    let project_path = match &cli.project {
        Some(path) => path.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Package { dry_run } => {
            let output = commands::run_package(&project_path, config, dry_run, &cli.format)?;
            emit(&output)?;
        }

        Commands::Deploy { dry_run } => {
            let output = commands::run_deploy(&project_path, config, dry_run, &cli.format)?;
            emit(&output)?;
        }

        Commands::Sanitize {
            ref input,
            ref output,
            ref marker,
            check,
        } => {
            let outcome = commands::run_sanitize(
                input.as_deref(),
                output.as_deref(),
                marker,
                check,
                &cli.format,
            )?;
            emit(&outcome.stdout)?;
            if !outcome.clean {
                std::process::exit(1);
            }
        }

        Commands::Config => {
            let output = commands::run_config(&project_path, config, &cli.format)?;
            emit(&output)?;
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over the `-q`/`-v` flags.
fn setup_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init()
        .ok();
}
