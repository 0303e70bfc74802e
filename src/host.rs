// src/host.rs

//! Required host program discovery
//!
//! mortar drives a handful of external tools: archivers, a downloader, git,
//! patch, a simulated-root helper. [`require`] is the precondition check
//! used before shelling out; [`doctor`] enumerates everything missing so an
//! operator can fix the host in one pass.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::Command;

/// Programs mortar needs at runtime, with the feature each one serves
pub const REQUIRED: &[(&str, &str)] = &[
    ("tar", "archive packing and unpacking"),
    ("zstd", "zstd package compression"),
    ("xz", "xz package compression"),
    ("gzip", "gzip source extraction"),
    ("bzip2", "bzip2 source extraction"),
    ("curl", "source downloads"),
    ("git", "git sources"),
    ("patch", "applying source patches"),
    ("rsync", "chroot build staging"),
    ("fakeroot", "root-redirected default install stage"),
    ("strip", "binary stripping at package time"),
    ("cc", "toolchain fingerprint"),
    ("ld", "toolchain fingerprint"),
];

/// Locate `program` on PATH, or fail with `MissingHostCommand` (exit 127)
pub fn require(program: &str) -> Result<PathBuf> {
    which(program).ok_or_else(|| Error::MissingHostCommand(program.to_string()))
}

/// Check whether `program` resolves on PATH
pub fn available(program: &str) -> bool {
    which(program).is_some()
}

/// Enumerate missing required programs as `(name, purpose)` pairs.
///
/// An empty result means the host is fully equipped.
pub fn doctor() -> Vec<(&'static str, &'static str)> {
    REQUIRED
        .iter()
        .filter(|(prog, _)| !available(prog))
        .copied()
        .collect()
}

/// Run a tool's version probe and return the first output line.
///
/// Used by the toolchain fingerprint; a failed probe returns `None` and the
/// caller records the `<tool>?` sentinel instead.
pub fn version_probe(program: &str, arg: &str) -> Option<String> {
    let output = Command::new(program).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

fn which(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_finds_sh() {
        // /bin/sh exists on any host these tests run on
        assert!(require("sh").is_ok());
    }

    #[test]
    fn test_require_missing_maps_to_127() {
        let err = require("definitely-not-a-real-tool-9431").unwrap_err();
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn test_doctor_reports_pairs() {
        // Whatever the host has, doctor must only report names from REQUIRED
        for (name, _purpose) in doctor() {
            assert!(REQUIRED.iter().any(|(p, _)| *p == name));
        }
    }

    #[test]
    fn test_version_probe_missing_tool() {
        assert!(version_probe("definitely-not-a-real-tool-9431", "--version").is_none());
    }
}
