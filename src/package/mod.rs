use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::requirements::{sanitize_file, SanitizeReport};
use crate::sync::{mirror, SyncReport};

/// Outcome of a packaging run.
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub output: PathBuf,
    pub cleaned: Vec<PathBuf>,
    pub copied_files: Vec<PathBuf>,
    pub assets: Option<SyncReport>,
    pub requirements: SanitizeReport,
}

/// Everything a packaging run would touch, resolved against the project root.
#[derive(Debug, Clone, Serialize)]
pub struct PackagePlan {
    pub output: PathBuf,
    pub clean: Vec<PathBuf>,
    pub files: Vec<(PathBuf, PathBuf)>,
    pub assets: Option<(PathBuf, PathBuf)>,
    pub requirements: (PathBuf, PathBuf),
}

/// Work out what `package` would do without touching the filesystem.
pub fn plan(project_root: &Path, config: &DeployConfig) -> Result<PackagePlan> {
    let output = project_root.join(&config.output);
    let clean = clean_targets(&output, config)?;

    let mut files = Vec::with_capacity(config.files.len());
    for file in &config.files {
        let name = file
            .file_name()
            .ok_or_else(|| DeployError::InvalidConfig(format!("no file name in {}", file.display())))?;
        files.push((project_root.join(file), output.join(name)));
    }

    let assets = config
        .assets
        .as_ref()
        .map(|a| (project_root.join(&a.source), output.join(&a.dest)));

    let requirements = (
        project_root.join(&config.requirements.source),
        output.join(&config.requirements.dest),
    );

    Ok(PackagePlan {
        output,
        clean,
        files,
        assets,
        requirements,
    })
}

/// Assemble the deployment directory.
///
/// Runs clean, copy, mirror and sanitize in that order and stops at the
/// first failure. Sources are checked before anything is removed.
pub fn package(project_root: &Path, config: &DeployConfig) -> Result<PackageReport> {
    config.validate()?;
    let plan = plan(project_root, config)?;
    check_sources(&plan)?;

    fs::create_dir_all(&plan.output)
        .with_context(|| format!("Failed to create {}", plan.output.display()))?;

    info!(output = %plan.output.display(), count = plan.clean.len(), "cleaning previous output");
    let mut cleaned = Vec::with_capacity(plan.clean.len());
    for path in &plan.clean {
        remove_entry(path)?;
        debug!(path = %path.display(), "removed");
        cleaned.push(relative_to(path, &plan.output));
    }

    info!(count = plan.files.len(), "copying application files");
    let mut copied_files = Vec::with_capacity(plan.files.len());
    for (from, to) in &plan.files {
        fs::copy(from, to)
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
        debug!(from = %from.display(), "copied");
        copied_files.push(relative_to(to, &plan.output));
    }

    let assets = match (&plan.assets, &config.assets) {
        (Some((src, dst)), Some(assets_config)) => {
            info!(src = %src.display(), dst = %dst.display(), "mirroring assets");
            let report = mirror(src, dst, &assets_config.exclude)?;
            info!(
                copied = report.copied.len(),
                unchanged = report.unchanged.len(),
                deleted = report.deleted.len(),
                "assets mirrored"
            );
            Some(report)
        }
        _ => None,
    };

    let (req_src, req_dst) = &plan.requirements;
    info!(src = %req_src.display(), "sanitizing requirements");
    let requirements = sanitize_file(req_src, req_dst, &config.sanitizer())?;
    info!(
        hash_lines_removed = requirements.hash_lines_removed,
        "requirements written"
    );

    Ok(PackageReport {
        output: plan.output,
        cleaned,
        copied_files,
        assets,
        requirements,
    })
}

/// Top-level entries of `output` matched by the clean globs.
fn clean_targets(output: &Path, config: &DeployConfig) -> Result<Vec<PathBuf>> {
    if !output.is_dir() {
        return Ok(Vec::new());
    }
    let matcher = config.clean_matcher()?;
    let mut targets = Vec::new();
    for entry in fs::read_dir(output).with_context(|| format!("Failed to read {}", output.display()))? {
        let entry = entry.context("error reading directory entry")?;
        if matcher.matches(Path::new(&entry.file_name())) {
            targets.push(entry.path());
        }
    }
    targets.sort();
    Ok(targets)
}

fn check_sources(plan: &PackagePlan) -> Result<()> {
    for (from, _) in &plan.files {
        if !from.is_file() {
            return Err(DeployError::MissingSource(from.clone()).into());
        }
    }
    if let Some((src, _)) = &plan.assets {
        if !src.is_dir() {
            return Err(DeployError::MissingSource(src.clone()).into());
        }
    }
    if !plan.requirements.0.is_file() {
        return Err(DeployError::MissingSource(plan.requirements.0.clone()).into());
    }
    Ok(())
}

fn remove_entry(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base).unwrap_or(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssetsConfig;
    use tempfile::TempDir;

    /// A dashboard project laid out the way the default config expects.
    fn setup_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("app.py"), "server = app.server\n").unwrap();
        fs::write(root.join("data.csv"), "日期,累计确诊\n2020-01-20,291\n").unwrap();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("assets/app.css"), ".app-note { color: gray; }").unwrap();
        fs::write(
            root.join("requirements.txt"),
            "dash==1.8.0 \\\n    --hash=sha256:aaaa \\\n    --hash=sha256:bbbb\ngunicorn==20.0.4\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_package_default_layout() {
        let dir = setup_project();
        let report = package(dir.path(), &DeployConfig::default()).unwrap();
        let out = dir.path().join("deploy");

        assert_eq!(
            report.copied_files,
            vec![PathBuf::from("app.py"), PathBuf::from("data.csv")]
        );
        assert!(out.join("app.py").is_file());
        assert!(out.join("data.csv").is_file());
        assert!(out.join("assets/app.css").is_file());
        assert_eq!(
            fs::read_to_string(out.join("requirements.txt")).unwrap(),
            "dash==1.8.0\ngunicorn==20.0.4\n"
        );
        assert_eq!(report.requirements.hash_lines_removed, 2);
        assert_eq!(report.assets.unwrap().copied.len(), 1);
    }

    #[test]
    fn test_clean_removes_managed_files_only() {
        let dir = setup_project();
        let out = dir.path().join("deploy");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("old_module.py"), "stale").unwrap();
        fs::write(out.join("app.yaml"), "runtime: python37\n").unwrap();

        let report = package(dir.path(), &DeployConfig::default()).unwrap();

        assert!(!out.join("old_module.py").exists());
        assert!(out.join("app.yaml").exists());
        assert_eq!(report.cleaned, vec![PathBuf::from("old_module.py")]);
    }

    #[test]
    fn test_assets_mirror_deletes_stale_files() {
        let dir = setup_project();
        let out = dir.path().join("deploy");
        fs::create_dir_all(out.join("assets")).unwrap();
        fs::write(out.join("assets/removed.js"), "x").unwrap();

        let report = package(dir.path(), &DeployConfig::default()).unwrap();

        assert!(!out.join("assets/removed.js").exists());
        assert_eq!(
            report.assets.unwrap().deleted,
            vec![PathBuf::from("removed.js")]
        );
    }

    #[test]
    fn test_no_assets_section_skips_mirror() {
        let dir = setup_project();
        let config = DeployConfig {
            assets: None,
            ..Default::default()
        };
        let report = package(dir.path(), &config).unwrap();
        assert!(report.assets.is_none());
        assert!(!dir.path().join("deploy/assets").exists());
    }

    #[test]
    fn test_missing_file_fails_before_cleaning() {
        let dir = setup_project();
        let out = dir.path().join("deploy");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("main.py"), "previous build").unwrap();
        fs::remove_file(dir.path().join("data.csv")).unwrap();

        let err = package(dir.path(), &DeployConfig::default()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::MissingSource(p)) if p.ends_with("data.csv")
        ));
        assert!(out.join("main.py").exists());
    }

    #[test]
    fn test_missing_assets_dir_fails() {
        let dir = setup_project();
        fs::remove_dir_all(dir.path().join("assets")).unwrap();
        assert!(package(dir.path(), &DeployConfig::default()).is_err());
    }

    #[test]
    fn test_nested_source_file_lands_at_top_level() {
        let dir = setup_project();
        fs::create_dir_all(dir.path().join("web")).unwrap();
        fs::write(dir.path().join("web/wsgi.py"), "from app import server\n").unwrap();
        let config = DeployConfig {
            files: vec![PathBuf::from("app.py"), PathBuf::from("web/wsgi.py")],
            ..Default::default()
        };
        package(dir.path(), &config).unwrap();
        assert!(dir.path().join("deploy/wsgi.py").is_file());
    }

    #[test]
    fn test_output_resolving_to_project_root_deletes_nothing() {
        let dir = setup_project();
        let config = DeployConfig {
            output: PathBuf::from("assets/.."),
            assets: Some(AssetsConfig {
                dest: PathBuf::from("static"),
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = package(dir.path(), &config).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::InvalidConfig(_))
        ));
        assert!(dir.path().join("app.py").is_file());
        assert!(dir.path().join("data.csv").is_file());
        assert!(dir.path().join("requirements.txt").is_file());
    }

    #[test]
    fn test_assets_dest_at_output_root_rejected() {
        let dir = setup_project();
        package(dir.path(), &DeployConfig::default()).unwrap();
        let config = DeployConfig {
            assets: Some(AssetsConfig {
                dest: PathBuf::from("."),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(package(dir.path(), &config).is_err());
        assert!(dir.path().join("deploy/app.py").is_file());
        assert!(dir.path().join("deploy/data.csv").is_file());
    }

    #[test]
    fn test_plan_touches_nothing() {
        let dir = setup_project();
        let config = DeployConfig {
            assets: Some(AssetsConfig::default()),
            ..Default::default()
        };
        let plan = plan(dir.path(), &config).unwrap();
        assert_eq!(plan.output, dir.path().join("deploy"));
        assert!(plan.clean.is_empty());
        assert_eq!(plan.files.len(), 2);
        assert!(!dir.path().join("deploy").exists());
    }

    #[test]
    fn test_repackage_is_stable() {
        let dir = setup_project();
        package(dir.path(), &DeployConfig::default()).unwrap();
        let report = package(dir.path(), &DeployConfig::default()).unwrap();

        let mut cleaned = report.cleaned.clone();
        cleaned.sort();
        assert_eq!(
            cleaned,
            vec![
                PathBuf::from("app.py"),
                PathBuf::from("data.csv"),
                PathBuf::from("requirements.txt")
            ]
        );
        assert_eq!(report.assets.unwrap().unchanged, vec![PathBuf::from("app.css")]);
    }
}
