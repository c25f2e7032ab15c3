use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;
use crate::requirements::{Sanitizer, DEFAULT_HASH_MARKER};

pub mod matcher;

use matcher::FileMatcher;

/// Top-level deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Deployment directory, relative to the project root.
    pub output: PathBuf,
    /// Application modules and data files copied into `output`.
    pub files: Vec<PathBuf>,
    /// Globs for top-level entries of `output` removed before packaging.
    pub clean: Vec<String>,
    /// Directory mirrored into `output`. A config file without an
    /// `[assets]` table disables mirroring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<AssetsConfig>,
    pub requirements: RequirementsConfig,
    pub deploy: CommandConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    pub source: PathBuf,
    /// Destination inside `output`.
    pub dest: PathBuf,
    /// Globs (relative to `source`) left out of the mirror.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequirementsConfig {
    pub source: PathBuf,
    /// Destination inside `output`.
    pub dest: PathBuf,
    pub hash_marker: String,
}

/// External command run from the output directory after packaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    pub command: Vec<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("deploy"),
            files: vec![PathBuf::from("app.py"), PathBuf::from("data.csv")],
            clean: vec![
                "*.py".to_string(),
                "*.csv".to_string(),
                "requirements.txt".to_string(),
            ],
            assets: Some(AssetsConfig::default()),
            requirements: RequirementsConfig::default(),
            deploy: CommandConfig::default(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("assets"),
            dest: PathBuf::from("assets"),
            exclude: Vec::new(),
        }
    }
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("requirements.txt"),
            dest: PathBuf::from("requirements.txt"),
            hash_marker: DEFAULT_HASH_MARKER.to_string(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: ["gcloud", "app", "deploy", "--quiet"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DeployConfig {
    /// Check the invariants serde cannot express.
    ///
    /// `output` must be a proper subdirectory of the project that shares no
    /// path with any source, since packaging cleans it. Inside `output`, the
    /// copied files, the assets mirror and the sanitized manifest must land
    /// on disjoint paths, since the mirror deletes whatever it does not own.
    pub fn validate(&self) -> Result<()> {
        let output = check_relative("output", &self.output)?;
        if output.as_os_str().is_empty() {
            return Err(invalid("output must name a subdirectory of the project"));
        }

        // (field, project-relative path) read by packaging.
        let mut sources = Vec::new();
        // (field, output-relative path) written by packaging.
        let mut targets = Vec::new();

        for file in &self.files {
            sources.push(("files", check_relative("files", file)?));
            let name = file
                .file_name()
                .ok_or_else(|| invalid(format!("files entry {} names no file", file.display())))?;
            targets.push(("files", PathBuf::from(name)));
        }
        if let Some(assets) = &self.assets {
            sources.push(("assets.source", check_relative("assets.source", &assets.source)?));
            let dest = check_relative("assets.dest", &assets.dest)?;
            if dest.as_os_str().is_empty() {
                return Err(invalid("assets.dest must name a subdirectory of output"));
            }
            targets.push(("assets.dest", dest));
            FileMatcher::new(&assets.exclude)
                .map_err(|e| invalid(format!("assets.exclude: {e}")))?;
        }
        sources.push((
            "requirements.source",
            check_relative("requirements.source", &self.requirements.source)?,
        ));
        let manifest = check_relative("requirements.dest", &self.requirements.dest)?;
        if manifest.as_os_str().is_empty() {
            return Err(invalid("requirements.dest must name a file inside output"));
        }
        targets.push(("requirements.dest", manifest));

        for (field, source) in &sources {
            if overlaps(&output, source) {
                return Err(invalid(format!(
                    "output {} overlaps {field} {}",
                    self.output.display(),
                    source.display()
                )));
            }
        }
        for (i, (field, target)) in targets.iter().enumerate() {
            if let Some((other, _)) = targets[i + 1..].iter().find(|(_, t)| overlaps(target, t)) {
                return Err(invalid(format!(
                    "{field} and {other} both write {} inside output",
                    target.display()
                )));
            }
        }

        if self.requirements.hash_marker.is_empty() {
            return Err(invalid("requirements.hash_marker must not be empty"));
        }
        if self.deploy.command.first().map_or(true, |p| p.is_empty()) {
            return Err(invalid("deploy.command must name a program"));
        }
        self.clean_matcher()?;
        Ok(())
    }

    pub fn clean_matcher(&self) -> Result<FileMatcher> {
        FileMatcher::new(&self.clean).map_err(|e| invalid(format!("clean: {e}")))
    }

    pub fn sanitizer(&self) -> Sanitizer {
        Sanitizer::new(self.requirements.hash_marker.clone())
    }
}

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    DeployError::InvalidConfig(msg.into()).into()
}

/// Reject absolute paths and paths that climb out of their base with `..`.
///
/// Returns the path with `.` and `..` resolved lexically; an empty result
/// means the base itself.
fn check_relative(field: &str, path: &Path) -> Result<PathBuf> {
    if path.is_absolute() || path.has_root() {
        return Err(invalid(format!(
            "{field} must be relative, got {}",
            path.display()
        )));
    }
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(invalid(format!(
                        "{field} escapes the project root: {}",
                        path.display()
                    )));
                }
            }
            Component::Normal(part) => normalized.push(part),
            _ => {}
        }
    }
    Ok(normalized)
}

/// One path equals or contains the other.
fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Default config file names, searched in order.
const CONFIG_FILENAMES: &[&str] = &[".ncov-deploy/deploy.toml", "ncov-deploy.toml"];

/// Find the config file for a project.
///
/// If `config_override` is provided, use that path directly.
/// Otherwise, search for config files in the project root.
pub fn find_config_path(project_root: &Path, config_override: Option<&Path>) -> Option<PathBuf> {
    if let Some(override_path) = config_override {
        if override_path.exists() {
            return Some(override_path.to_path_buf());
        }
        return None;
    }

    for filename in CONFIG_FILENAMES {
        let path = project_root.join(filename);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load and validate a config from a TOML file.
pub fn load_config(path: &Path) -> Result<DeployConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parse and validate a config from a TOML string.
pub fn parse_config(toml_str: &str) -> Result<DeployConfig> {
    let config: DeployConfig = toml::from_str(toml_str)?;
    config.validate()?;
    Ok(config)
}

/// Resolve the effective config for a project.
///
/// An explicit override that does not exist is an error; otherwise a
/// missing config file falls back to the built-in defaults.
pub fn resolve_config(project_root: &Path, config_override: Option<&Path>) -> Result<DeployConfig> {
    match find_config_path(project_root, config_override) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config(&path)
        }
        None => match config_override {
            Some(missing) => Err(DeployError::MissingSource(missing.to_path_buf()).into()),
            None => Ok(DeployConfig::default()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.output, PathBuf::from("deploy"));
        assert_eq!(config.files, DeployConfig::default().files);
        assert_eq!(config.requirements.hash_marker, "--hash");
        assert_eq!(config.deploy.command[0], "gcloud");
    }

    #[test]
    fn test_missing_assets_table_disables_mirror() {
        assert!(parse_config("output = \"dist\"\n").unwrap().assets.is_none());
        let config = parse_config("[assets]\n").unwrap();
        assert_eq!(config.assets, Some(AssetsConfig::default()));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
output = "dist"
files = ["app.py", "wsgi.py", "data.csv"]
clean = ["*.py"]

[assets]
source = "static"
dest = "static"
exclude = ["*.map"]

[requirements]
source = "requirements.lock"
dest = "requirements.txt"
hash_marker = "--hash="

[deploy]
command = ["echo", "deployed"]
"#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.output, PathBuf::from("dist"));
        assert_eq!(config.files.len(), 3);
        let assets = config.assets.unwrap();
        assert_eq!(assets.source, PathBuf::from("static"));
        assert_eq!(assets.exclude, vec!["*.map".to_string()]);
        assert_eq!(config.requirements.source, PathBuf::from("requirements.lock"));
        assert_eq!(config.requirements.hash_marker, "--hash=");
        assert_eq!(config.deploy.command, vec!["echo", "deployed"]);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config = parse_config("[requirements]\nsource = \"reqs.txt\"\n").unwrap();
        assert_eq!(config.requirements.source, PathBuf::from("reqs.txt"));
        assert_eq!(config.requirements.dest, PathBuf::from("requirements.txt"));
        assert_eq!(config.requirements.hash_marker, "--hash");
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(parse_config("outptu = \"x\"\n").is_err());
    }

    #[test]
    fn test_absolute_output_rejected() {
        let err = parse_config("output = \"/tmp/deploy\"\n").unwrap_err();
        let typed = err.downcast_ref::<DeployError>();
        assert!(matches!(typed, Some(DeployError::InvalidConfig(_))));
    }

    #[test]
    fn test_escaping_output_rejected() {
        assert!(parse_config("output = \"../elsewhere\"\n").is_err());
        assert!(parse_config("output = \"a/../../b\"\n").is_err());
        assert!(parse_config("output = \"a/../b\"\n").is_ok());
    }

    #[test]
    fn test_project_root_as_output_rejected() {
        assert!(parse_config("output = \".\"\n").is_err());
        assert!(parse_config("output = \"\"\n").is_err());
    }

    #[test]
    fn test_output_normalizing_to_project_root_rejected() {
        for output in ["assets/..", "./.", "deploy/../."] {
            let toml = format!("output = \"{output}\"\n[assets]\ndest = \"static\"\n");
            let err = parse_config(&toml).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<DeployError>(), Some(DeployError::InvalidConfig(_))),
                "{output} accepted"
            );
        }
    }

    #[test]
    fn test_output_overlapping_a_source_rejected() {
        // Cleaning would delete the assets being mirrored.
        assert!(parse_config("output = \"assets\"\n[assets]\n").is_err());
        assert!(parse_config("output = \"assets/build\"\n[assets]\n").is_err());
        // A copied file living inside output.
        assert!(parse_config("output = \"src\"\nfiles = [\"src/app.py\"]\n").is_err());
        assert!(parse_config("output = \"requirements.txt\"\n").is_err());
        assert!(parse_config("output = \"deploy/../build\"\n").is_ok());
    }

    #[test]
    fn test_assets_dest_must_be_a_subdirectory() {
        for dest in [".", "", "static/.."] {
            let toml = format!("[assets]\ndest = \"{dest}\"\n");
            assert!(parse_config(&toml).is_err(), "assets.dest {dest:?} accepted");
        }
    }

    #[test]
    fn test_overlapping_destinations_rejected() {
        assert!(parse_config("[assets]\ndest = \"app.py\"\n").is_err());
        assert!(parse_config("[assets]\ndest = \"requirements.txt/x\"\n").is_err());
        assert!(parse_config("[requirements]\ndest = \"assets/requirements.txt\"\n[assets]\n").is_err());
        assert!(parse_config("files = [\"app.py\", \"web/app.py\"]\n").is_err());
        assert!(parse_config("[requirements]\ndest = \".\"\n").is_err());
        assert!(parse_config("[assets]\ndest = \"static/assets\"\n").is_ok());
    }

    #[test]
    fn test_empty_marker_rejected() {
        assert!(parse_config("[requirements]\nhash_marker = \"\"\n").is_err());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(parse_config("[deploy]\ncommand = []\n").is_err());
    }

    #[test]
    fn test_invalid_clean_glob_rejected() {
        assert!(parse_config("clean = [\"[oops\"]\n").is_err());
    }

    #[test]
    fn test_find_config_with_override() {
        let dir = TempDir::new().unwrap();
        let custom = dir.path().join("custom.toml");
        fs::write(&custom, "").unwrap();
        let found = find_config_path(dir.path(), Some(&custom));
        assert_eq!(found, Some(custom));
    }

    #[test]
    fn test_find_config_prefers_dot_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".ncov-deploy")).unwrap();
        fs::write(dir.path().join(".ncov-deploy/deploy.toml"), "").unwrap();
        fs::write(dir.path().join("ncov-deploy.toml"), "").unwrap();
        let found = find_config_path(dir.path(), None).unwrap();
        assert!(found.ends_with(".ncov-deploy/deploy.toml"));
    }

    #[test]
    fn test_find_config_none() {
        let dir = TempDir::new().unwrap();
        assert!(find_config_path(dir.path(), None).is_none());
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = resolve_config(dir.path(), None).unwrap();
        assert_eq!(config, DeployConfig::default());
    }

    #[test]
    fn test_resolve_missing_override_is_error() {
        let dir = TempDir::new().unwrap();
        let err = resolve_config(dir.path(), Some(&dir.path().join("gone.toml"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::MissingSource(_))
        ));
    }

    #[test]
    fn test_load_config_reports_path_on_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ncov-deploy.toml");
        fs::write(&path, "output = 3\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
