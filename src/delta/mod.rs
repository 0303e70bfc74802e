// src/delta/mod.rs

//! Manifest deltas: structured diffs between two package versions
//!
//! A delta joins two manifests on path and buckets every path into one of
//! four sections: added, removed, changed (with both hashes) and
//! unchanged. The textual form is line-based:
//!
//! ```text
//! added <path>
//! removed <path>
//! changed <old-hash> <new-hash> <path>
//! unchanged <path>
//! ```
//!
//! Delta files live under `delta/<name>/<old>__to__<new>.delta`.

use crate::error::{Error, Result};
use crate::fsutil;
use crate::package::Manifest;
use crate::version::Evr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// A changed path with both sides' hashes; `-` stands for "no hash"
/// (directories, symlinks, or a path that changed kind)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    pub path: String,
    pub old_hash: String,
    pub new_hash: String,
}

/// The four-section diff between two manifests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<ChangedPath>,
    pub unchanged: Vec<String>,
}

impl Delta {
    /// Join `old` and `new` on path.
    ///
    /// Paths only in `new` are added; only in `old`, removed. Paths in
    /// both are changed when their hashes differ (or their kind changed),
    /// unchanged otherwise. Sections come out sorted because manifests
    /// are sorted.
    pub fn between(old: &Manifest, new: &Manifest) -> Self {
        let old_by_path = old.by_path();
        let new_by_path = new.by_path();
        let mut delta = Delta::default();

        for (path, new_entry) in &new_by_path {
            match old_by_path.get(path) {
                None => delta.added.push(path.to_string()),
                Some(old_entry) => {
                    let same = old_entry.kind == new_entry.kind
                        && old_entry.hash == new_entry.hash;
                    if same {
                        delta.unchanged.push(path.to_string());
                    } else {
                        delta.changed.push(ChangedPath {
                            path: path.to_string(),
                            old_hash: old_entry.hash.clone().unwrap_or_else(|| "-".into()),
                            new_hash: new_entry.hash.clone().unwrap_or_else(|| "-".into()),
                        });
                    }
                }
            }
        }

        for path in old_by_path.keys() {
            if !new_by_path.contains_key(path) {
                delta.removed.push(path.to_string());
            }
        }

        delta
    }

    /// Render to the line-based form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for path in &self.added {
            out.push_str("added ");
            out.push_str(path);
            out.push('\n');
        }
        for path in &self.removed {
            out.push_str("removed ");
            out.push_str(path);
            out.push('\n');
        }
        for change in &self.changed {
            out.push_str("changed ");
            out.push_str(&change.old_hash);
            out.push(' ');
            out.push_str(&change.new_hash);
            out.push(' ');
            out.push_str(&change.path);
            out.push('\n');
        }
        for path in &self.unchanged {
            out.push_str("unchanged ");
            out.push_str(path);
            out.push('\n');
        }
        out
    }

    /// Parse the line-based form
    pub fn parse(text: &str) -> Result<Self> {
        let mut delta = Delta::default();
        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let err = |reason: &str| Error::Parse {
                file: format!("delta line {}", lineno + 1),
                reason: reason.to_string(),
            };

            let (section, rest) = line.split_once(' ').ok_or_else(|| err("missing section"))?;
            match section {
                "added" => delta.added.push(rest.to_string()),
                "removed" => delta.removed.push(rest.to_string()),
                "unchanged" => delta.unchanged.push(rest.to_string()),
                "changed" => {
                    let mut fields = rest.splitn(3, ' ');
                    let old_hash = fields.next().ok_or_else(|| err("missing old hash"))?;
                    let new_hash = fields.next().ok_or_else(|| err("missing new hash"))?;
                    let path = fields.next().ok_or_else(|| err("missing path"))?;
                    delta.changed.push(ChangedPath {
                        path: path.to_string(),
                        old_hash: old_hash.to_string(),
                        new_hash: new_hash.to_string(),
                    });
                }
                other => return Err(err(&format!("unknown section '{}'", other))),
            }
        }
        Ok(delta)
    }
}

/// File path for a delta, keyed by name and both EVRs
pub fn delta_path(delta_dir: &Path, name: &str, from: &Evr, to: &Evr) -> PathBuf {
    delta_dir
        .join(name)
        .join(format!("{}__to__{}.delta", from, to))
}

/// Compute and persist the delta between two manifests
pub fn write_delta(
    delta_dir: &Path,
    name: &str,
    from: &Evr,
    to: &Evr,
    old: &Manifest,
    new: &Manifest,
) -> Result<PathBuf> {
    let delta = Delta::between(old, new);
    let path = delta_path(delta_dir, name, from, to);
    fsutil::write_atomic(&path, delta.render().as_bytes())?;
    info!(
        "delta {} {} -> {}: +{} -{} ~{}",
        name,
        from,
        to,
        delta.added.len(),
        delta.removed.len(),
        delta.changed.len()
    );
    Ok(path)
}

/// Read a previously written delta
pub fn read_delta(delta_dir: &Path, name: &str, from: &Evr, to: &Evr) -> Result<Delta> {
    let path = delta_path(delta_dir, name, from, to);
    let text = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("delta {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    Delta::parse(&text)
}
