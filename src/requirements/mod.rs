use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

/// Token that marks a hash-verification line in a pip requirements file.
pub const DEFAULT_HASH_MARKER: &str = "--hash";

/// Line continuation suffix left behind on the constraint line.
const CONTINUATION: &[u8] = b" \\";

/// Strips hash pins from a dependency manifest.
///
/// Lines containing the hash marker are dropped and the trailing `" \"`
/// continuation is removed from every remaining line. The filter works on
/// raw bytes and looks at nothing else, so malformed or non-UTF-8 input
/// passes through.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    hash_marker: String,
}

/// Counts gathered while sanitizing a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeReport {
    pub lines_in: usize,
    pub lines_out: usize,
    pub hash_lines_removed: usize,
    pub continuations_stripped: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_MARKER)
    }
}

impl Sanitizer {
    pub fn new(hash_marker: impl Into<String>) -> Self {
        Self {
            hash_marker: hash_marker.into(),
        }
    }

    /// Filter an ordered sequence of lines (without terminators).
    pub fn sanitize_lines<I, S>(&self, lines: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = SanitizeReport::default();
        lines
            .into_iter()
            .filter_map(|line| {
                let line = line.as_ref();
                // Only ASCII is stripped, so the kept prefix stays on a char boundary.
                self.filter_line(line.as_bytes(), &mut report)
                    .map(|kept| line[..kept.len()].to_string())
            })
            .collect()
    }

    /// Filter a whole manifest, keeping its line terminators intact.
    pub fn sanitize(&self, text: &[u8]) -> (Vec<u8>, SanitizeReport) {
        let mut report = SanitizeReport::default();
        let mut out = Vec::with_capacity(text.len());

        for raw in text.split_inclusive(|&b| b == b'\n') {
            let (body, terminator) = split_terminator(raw);
            if let Some(kept) = self.filter_line(body, &mut report) {
                out.extend_from_slice(kept);
                out.extend_from_slice(terminator);
            }
        }

        // A dropped, unterminated last line leaves the previous terminator
        // dangling; the output ends the way the input did.
        if !text.ends_with(b"\n") {
            let keep = split_terminator(&out).0.len();
            out.truncate(keep);
        }

        (out, report)
    }

    /// True when sanitizing `text` would leave it unchanged.
    pub fn is_sanitized(&self, text: &[u8]) -> bool {
        let (out, _) = self.sanitize(text);
        out == text
    }

    fn filter_line<'a>(&self, line: &'a [u8], report: &mut SanitizeReport) -> Option<&'a [u8]> {
        report.lines_in += 1;
        if contains(line, self.hash_marker.as_bytes()) {
            report.hash_lines_removed += 1;
            return None;
        }

        let mut kept = line;
        // Repeated suffixes are all removed so a second pass is a no-op.
        while let Some(stripped) = kept.strip_suffix(CONTINUATION) {
            kept = stripped;
        }
        if kept.len() != line.len() {
            report.continuations_stripped += 1;
        }

        report.lines_out += 1;
        Some(kept)
    }
}

/// An empty marker matches nothing.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Split a line into body and its `\n` or `\r\n` terminator.
fn split_terminator(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = raw.strip_suffix(b"\r\n") {
        (body, &raw[body.len()..])
    } else if let Some(body) = raw.strip_suffix(b"\n") {
        (body, &raw[body.len()..])
    } else {
        (raw, &[])
    }
}

/// Sanitize the manifest at `src` and write the result to `dst`.
pub fn sanitize_file(src: &Path, dst: &Path, sanitizer: &Sanitizer) -> Result<SanitizeReport> {
    let content =
        std::fs::read(src).with_context(|| format!("Failed to read {}", src.display()))?;
    let (sanitized, report) = sanitizer.sanitize(&content);

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(dst, sanitized).with_context(|| format!("Failed to write {}", dst.display()))?;

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        removed = report.hash_lines_removed,
        "sanitized manifest"
    );
    Ok(report)
}
