use std::path::Path;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Glob list used by `clean` and `assets.exclude`.
///
/// A leading `!` turns a pattern into a carve-out: `["*.py", "!wsgi.py"]`
/// selects every module except `wsgi.py`.
#[derive(Debug, Clone)]
pub struct FileMatcher {
    selected: GlobSet,
    spared: GlobSet,
}

impl FileMatcher {
    /// Compile `patterns`. With no plain pattern nothing is selected.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut selected = GlobSetBuilder::new();
        let mut spared = GlobSetBuilder::new();

        for pattern in patterns {
            match pattern.strip_prefix('!') {
                Some(carve_out) => spared.add(Glob::new(carve_out)?),
                None => selected.add(Glob::new(pattern)?),
            };
        }

        Ok(Self {
            selected: selected.build()?,
            spared: spared.build()?,
        })
    }

    /// `path` is relative to the directory the list applies to.
    pub fn matches(&self, path: &Path) -> bool {
        self.selected.is_match(path) && !self.spared.is_match(path)
    }
}
