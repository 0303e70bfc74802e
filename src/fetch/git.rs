// src/fetch/git.rs

//! Deterministic archives from git sources
//!
//! A git source is pinned to a ref. We clone shallowly where the ref
//! allows it, export the tree with `git archive` (which stamps entries
//! with the commit time) and compress the result, so the same ref always
//! yields the same bytes. The commit time doubles as SOURCE_DATE_EPOCH
//! for the build that consumes the archive.

use crate::error::{Error, Result};
use crate::host;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info};

/// Result of exporting a git source
#[derive(Debug, Clone)]
pub struct GitArchive {
    /// The compressed, byte-reproducible tree archive
    pub path: PathBuf,
    /// HEAD commit time, to be exported as SOURCE_DATE_EPOCH
    pub commit_epoch: i64,
}

/// Clone `url` at `reference` and export `<name>-<shortref>.git.tar.zst`
/// into `out_dir`. Re-exports are skipped when the archive already exists.
pub fn fetch_git(url: &str, reference: &str, name: &str, out_dir: &Path) -> Result<GitArchive> {
    host::require("git")?;
    host::require("zstd")?;
    fs::create_dir_all(out_dir)?;

    let shortref = short_ref(reference);
    let archive_name = format!("{}-{}.git.tar.zst", name, shortref);
    let archive_path = out_dir.join(&archive_name);

    let clone_dir = TempDir::new()?;
    clone(url, reference, clone_dir.path())?;

    let commit_epoch = head_commit_time(clone_dir.path())?;
    if archive_path.exists() {
        debug!("git archive already cached: {}", archive_path.display());
        return Ok(GitArchive {
            path: archive_path,
            commit_epoch,
        });
    }

    // Export the pinned tree; git archive output is deterministic for a
    // given tree, prefix and commit time.
    let tar_path = clone_dir.path().join("export.tar");
    let prefix = format!("{}-{}/", name, shortref);
    run_git(
        clone_dir.path(),
        &[
            "archive",
            "--format=tar",
            &format!("--prefix={}", prefix),
            "-o",
            tar_path.to_str().expect("temp path is utf-8"),
            "HEAD",
        ],
    )?;

    let part = out_dir.join(format!("{}.part", archive_name));
    let status = Command::new("zstd")
        .arg("-q")
        .arg("-f")
        .arg("-o")
        .arg(&part)
        .arg(&tar_path)
        .output()?;
    if !status.status.success() {
        return Err(Error::Network {
            url: url.to_string(),
            reason: format!(
                "zstd failed: {}",
                String::from_utf8_lossy(&status.stderr).trim()
            ),
        });
    }
    fs::rename(&part, &archive_path)?;

    info!(
        "exported {}@{} -> {} (epoch {})",
        url,
        reference,
        archive_path.display(),
        commit_epoch
    );
    Ok(GitArchive {
        path: archive_path,
        commit_epoch,
    })
}

/// Shallow clone when the ref is a branch or tag; full clone + checkout
/// when it is a raw commit.
fn clone(url: &str, reference: &str, dest: &Path) -> Result<()> {
    let shallow = Command::new("git")
        .args([
            "clone",
            "--depth",
            "1",
            "--branch",
            reference,
            "--quiet",
            url,
        ])
        .arg(dest)
        .output()?;
    if shallow.status.success() {
        return Ok(());
    }

    debug!(
        "shallow clone of {}@{} failed, falling back to full clone",
        url, reference
    );
    let full = Command::new("git")
        .args(["clone", "--quiet", url])
        .arg(dest)
        .output()?;
    if !full.status.success() {
        return Err(Error::Network {
            url: url.to_string(),
            reason: String::from_utf8_lossy(&full.stderr).trim().to_string(),
        });
    }
    run_git(dest, &["checkout", "--quiet", reference])
}

fn head_commit_time(repo: &Path) -> Result<i64> {
    let output = Command::new("git")
        .current_dir(repo)
        .args(["log", "-1", "--format=%ct"])
        .output()?;
    if !output.status.success() {
        return Err(Error::Network {
            url: repo.display().to_string(),
            reason: "git log failed".to_string(),
        });
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| Error::Network {
            url: repo.display().to_string(),
            reason: "unparseable commit time".to_string(),
        })
}

fn run_git(repo: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git").current_dir(repo).args(args).output()?;
    if !output.status.success() {
        return Err(Error::Network {
            url: repo.display().to_string(),
            reason: format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

/// Sanitize a ref for use in a filename; long hex refs are shortened
fn short_ref(reference: &str) -> String {
    let is_hexish = reference.len() >= 12 && reference.chars().all(|c| c.is_ascii_hexdigit());
    let base = if is_hexish { &reference[..12] } else { reference };
    base.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_ref_passthrough_for_tags() {
        assert_eq!(short_ref("v1.2.3"), "v1.2.3");
    }

    #[test]
    fn test_short_ref_truncates_commits() {
        let sha = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(short_ref(sha), "0123456789ab");
    }

    #[test]
    fn test_short_ref_sanitizes_slashes() {
        assert_eq!(short_ref("feature/fast-path"), "feature-fast-path");
    }
}
