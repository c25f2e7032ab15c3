use std::path::Path;
use std::process::Command;

use anyhow::Result;
use tracing::info;

use crate::config::CommandConfig;
use crate::error::DeployError;

/// Run the configured cloud CLI from `workdir`.
///
/// stdio is inherited so the operator sees the CLI's own prompts and
/// progress. One attempt; a non-zero exit is an error.
pub fn run_deploy_command(workdir: &Path, config: &CommandConfig) -> Result<()> {
    let (program, args) = config
        .command
        .split_first()
        .ok_or_else(|| DeployError::InvalidConfig("deploy.command is empty".to_string()))?;

    info!(
        command = %config.command.join(" "),
        workdir = %workdir.display(),
        "running deploy command"
    );

    let status = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .status()
        .map_err(|source| DeployError::Spawn {
            program: program.clone(),
            source,
        })?;

    if !status.success() {
        return Err(DeployError::CommandFailed {
            program: program.clone(),
            status,
        }
        .into());
    }
    Ok(())
}
