use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::Serialize;
use tracing::debug;

use crate::config::matcher::FileMatcher;
use crate::error::DeployError;

/// What a mirror pass did, as paths relative to the mirrored roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub copied: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

/// A file found under the source root.
#[derive(Debug, Clone)]
struct SourceEntry {
    rel: PathBuf,
    is_dir: bool,
}

/// Mirror `src` into `dst`, the way `rsync -a --delete src/ dst/` does.
///
/// Files are copied when missing or when size or mtime differ, and keep the
/// source mtime. Destination entries absent from the source are removed.
/// Paths matching `exclude`, and everything below them, are neither copied
/// nor deleted.
///
/// Symlinks in the source are followed and mirrored as the files and
/// directories they point at. Symlinks in the destination are never followed:
/// they are replaced or removed like plain files.
pub fn mirror(src: &Path, dst: &Path, exclude: &[String]) -> Result<SyncReport> {
    if !src.is_dir() {
        return Err(DeployError::MissingSource(src.to_path_buf()).into());
    }
    let excluded = FileMatcher::new(exclude).context("invalid exclude pattern")?;

    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    let entries = walk(src, &excluded, true)?;
    let mut report = SyncReport::default();

    for entry in &entries {
        let from = src.join(&entry.rel);
        let to = dst.join(&entry.rel);
        if entry.is_dir {
            if !is_real_dir(&to) && fs::symlink_metadata(&to).is_ok() {
                remove_path(&to)?;
            }
            fs::create_dir_all(&to).with_context(|| format!("Failed to create {}", to.display()))?;
            continue;
        }
        if is_up_to_date(&from, &to)? {
            report.unchanged.push(entry.rel.clone());
            continue;
        }
        copy_preserving_mtime(&from, &to)?;
        debug!(path = %entry.rel.display(), "copied");
        report.copied.push(entry.rel.clone());
    }

    let keep: BTreeSet<&Path> = entries.iter().map(|e| e.rel.as_path()).collect();
    // Deepest first so directories are empty before they are removed.
    let mut stale: Vec<SourceEntry> = walk(dst, &excluded, false)?
        .into_iter()
        .filter(|e| !keep.contains(e.rel.as_path()))
        .collect();
    stale.sort_by(|a, b| b.rel.cmp(&a.rel));

    for entry in stale {
        let path = dst.join(&entry.rel);
        // An ancestor may already be gone, or an excluded file kept it alive.
        if fs::symlink_metadata(&path).is_err() {
            continue;
        }
        if entry.is_dir {
            if fs::read_dir(&path)?.next().is_some() {
                continue;
            }
            fs::remove_dir(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        debug!(path = %entry.rel.display(), "deleted");
        report.deleted.push(entry.rel);
    }

    report.copied.sort();
    report.unchanged.sort();
    report.deleted.sort();
    Ok(report)
}

/// List every file and directory below `root`, relative to it, sorted.
///
/// Excluded directories are pruned along with their contents. With
/// `follow_links`, a symlink reports the type of its target.
fn walk(root: &Path, excluded: &FileMatcher, follow_links: bool) -> Result<Vec<SourceEntry>> {
    let mut entries = Vec::new();

    let mut builder = WalkBuilder::new(root);
    // Mirror everything: no hidden-file or gitignore filtering.
    builder
        .standard_filters(false)
        .follow_links(follow_links);
    let prefix = root.to_path_buf();
    let matcher = excluded.clone();
    builder.filter_entry(move |entry| match entry.path().strip_prefix(&prefix) {
        Ok(rel) if !rel.as_os_str().is_empty() => !matcher.matches(rel),
        _ => true,
    });

    for entry in builder.build() {
        let entry = entry.context("error reading directory entry")?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?
            .to_path_buf();

        let is_dir = if follow_links {
            fs::metadata(entry.path())
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?
                .is_dir()
        } else {
            entry.file_type().is_some_and(|ft| ft.is_dir())
        };
        entries.push(SourceEntry { rel, is_dir });
    }

    entries.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(entries)
}

/// rsync's quick check: same size and same mtime.
fn is_up_to_date(from: &Path, to: &Path) -> Result<bool> {
    let src_meta =
        fs::metadata(from).with_context(|| format!("Failed to stat {}", from.display()))?;
    let dst_meta = match fs::symlink_metadata(to) {
        Ok(meta) => meta,
        Err(_) => return Ok(false),
    };
    if !dst_meta.is_file() || src_meta.len() != dst_meta.len() {
        return Ok(false);
    }
    Ok(get_mtime(&src_meta)? == get_mtime(&dst_meta)?)
}

fn copy_preserving_mtime(from: &Path, to: &Path) -> Result<()> {
    // Never write through a destination symlink.
    if fs::symlink_metadata(to).is_ok_and(|meta| !meta.is_file()) {
        remove_path(to)?;
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    let mtime = fs::metadata(from)?.modified()?;
    File::options()
        .write(true)
        .open(to)
        .and_then(|f| f.set_modified(mtime))
        .with_context(|| format!("Failed to set mtime on {}", to.display()))?;
    Ok(())
}

/// A directory that is not reached through a symlink.
fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.is_dir())
}

fn remove_path(path: &Path) -> Result<()> {
    let result = if is_real_dir(path) {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

fn get_mtime(metadata: &fs::Metadata) -> Result<SystemTime> {
    Ok(metadata.modified()?)
}
