use std::path::Path;

use serde::Serialize;

use super::OutputFormat;
use crate::package::{PackagePlan, PackageReport};
use crate::requirements::SanitizeReport;

/// Format any serializable value as JSON, newline-terminated.
pub fn format_json<T: Serialize>(value: &T, format: &OutputFormat) -> String {
    let mut json = match format {
        OutputFormat::Compact => serde_json::to_string(value).unwrap_or_default(),
        OutputFormat::Json | OutputFormat::Text => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
    };
    json.push('\n');
    json
}

/// Format the result of a packaging run.
pub fn format_package_report(report: &PackageReport, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => format_json(report, format),
        OutputFormat::Text => {
            let mut output = format!("Packaged {}\n", report.output.display());
            if !report.cleaned.is_empty() {
                output.push_str(&format!("  cleaned      {}\n", join(&report.cleaned)));
            }
            output.push_str(&format!("  copied       {}\n", join(&report.copied_files)));
            if let Some(assets) = &report.assets {
                output.push_str(&format!(
                    "  assets       {} copied, {} unchanged, {} deleted\n",
                    assets.copied.len(),
                    assets.unchanged.len(),
                    assets.deleted.len(),
                ));
            }
            output.push_str(&format!(
                "  requirements {}\n",
                describe_sanitize(&report.requirements)
            ));
            output
        }
    }
}

/// Format a dry-run plan.
pub fn format_plan(plan: &PackagePlan, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => format_json(plan, format),
        OutputFormat::Text => {
            let mut output = format!("Would package {}\n", plan.output.display());
            for path in &plan.clean {
                output.push_str(&format!("  remove  {}\n", path.display()));
            }
            for (from, to) in &plan.files {
                output.push_str(&format!("  copy    {} -> {}\n", from.display(), to.display()));
            }
            if let Some((src, dst)) = &plan.assets {
                output.push_str(&format!("  mirror  {}/ -> {}/\n", src.display(), dst.display()));
            }
            let (src, dst) = &plan.requirements;
            output.push_str(&format!("  strip   {} -> {}\n", src.display(), dst.display()));
            output
        }
    }
}

/// Format the counts from a standalone sanitize run.
pub fn format_sanitize_report(report: &SanitizeReport, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => format_json(report, format),
        OutputFormat::Text => format!("{}\n", describe_sanitize(report)),
    }
}

fn describe_sanitize(report: &SanitizeReport) -> String {
    format!(
        "{} -> {} lines ({} hash lines removed, {} continuations stripped)",
        report.lines_in, report.lines_out, report.hash_lines_removed, report.continuations_stripped,
    )
}

fn join<P: AsRef<Path>>(paths: &[P]) -> String {
    if paths.is_empty() {
        return "(none)".to_string();
    }
    paths
        .iter()
        .map(|p| p.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
