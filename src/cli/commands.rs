use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::resolve_config;
use crate::deploy::run_deploy_command;
use crate::package::{package, plan};
use crate::requirements::Sanitizer;

use super::output::{format_json, format_package_report, format_plan, format_sanitize_report};
use super::OutputFormat;

/// Run `package`, or show its plan with `dry_run`.
pub fn run_package(
    project_root: &Path,
    config_override: Option<&Path>,
    dry_run: bool,
    format: &OutputFormat,
) -> Result<String> {
    let config = resolve_config(project_root, config_override)?;
    if dry_run {
        config.validate()?;
        return Ok(format_plan(&plan(project_root, &config)?, format));
    }
    let report = package(project_root, &config)?;
    Ok(format_package_report(&report, format))
}

/// Run `package` followed by the configured deploy command.
pub fn run_deploy(
    project_root: &Path,
    config_override: Option<&Path>,
    dry_run: bool,
    format: &OutputFormat,
) -> Result<String> {
    let config = resolve_config(project_root, config_override)?;
    let report = package(project_root, &config)?;
    let mut output = format_package_report(&report, format);

    if dry_run {
        let line = config.deploy.command.join(" ");
        info!(command = %line, "dry run, not deploying");
        if matches!(format, OutputFormat::Text) {
            output.push_str(&format!(
                "Would run `{}` in {}\n",
                line,
                report.output.display()
            ));
        }
        return Ok(output);
    }

    run_deploy_command(&report.output, &config.deploy)?;
    if matches!(format, OutputFormat::Text) {
        output.push_str("Deployed\n");
    }
    Ok(output)
}

/// Outcome of the `sanitize` command.
pub struct SanitizeOutcome {
    /// What to print on stdout: the filtered manifest bytes or a report.
    pub stdout: Vec<u8>,
    /// False only when `--check` found hash pins.
    pub clean: bool,
}

/// Filter a requirements file (or stdin) and write the result.
pub fn run_sanitize(
    input: Option<&Path>,
    output: Option<&Path>,
    marker: &str,
    check: bool,
    format: &OutputFormat,
) -> Result<SanitizeOutcome> {
    if marker.is_empty() {
        anyhow::bail!("--marker must not be empty");
    }
    let sanitizer = Sanitizer::new(marker);
    let content = read_input(input)?;
    let (sanitized, report) = sanitizer.sanitize(&content);

    if check {
        let clean = sanitized == content;
        let name = input
            .filter(|p| *p != Path::new("-"))
            .map_or_else(|| "<stdin>".to_string(), |p| p.display().to_string());
        let stdout = match format {
            OutputFormat::Text if clean => format!("{name}: no hash pins\n"),
            OutputFormat::Text => format!(
                "{name}: {} hash lines, {} continuations to strip\n",
                report.hash_lines_removed, report.continuations_stripped
            ),
            _ => format_json(
                &serde_json::json!({ "input": name, "clean": clean, "report": report }),
                format,
            ),
        };
        return Ok(SanitizeOutcome {
            stdout: stdout.into_bytes(),
            clean,
        });
    }

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, &sanitized)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(SanitizeOutcome {
                stdout: format_sanitize_report(&report, format).into_bytes(),
                clean: true,
            })
        }
        None => {
            info!(
                hash_lines_removed = report.hash_lines_removed,
                continuations_stripped = report.continuations_stripped,
                "sanitized"
            );
            Ok(SanitizeOutcome {
                stdout: sanitized,
                clean: true,
            })
        }
    }
}

/// Print the effective configuration.
pub fn run_config(
    project_root: &Path,
    config_override: Option<&Path>,
    format: &OutputFormat,
) -> Result<String> {
    let config = resolve_config(project_root, config_override)?;
    match format {
        OutputFormat::Text => toml::to_string_pretty(&config).context("Failed to render config"),
        _ => Ok(format_json(&config, format)),
    }
}

/// Manifests are read as raw bytes; they need not be UTF-8.
fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) if path != Path::new("-") => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        _ => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Write command output to stdout as-is.
pub fn emit<T: AsRef<[u8]>>(output: T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_ref())?;
    stdout.flush()?;
    Ok(())
}
