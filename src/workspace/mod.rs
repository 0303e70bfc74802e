// src/workspace/mod.rs

//! Build workspace: archive extraction and patch application
//!
//! Extraction dispatches on the archive's extension to the host archiver.
//! After unpacking, a lone top-level directory is promoted to source root;
//! otherwise the workspace itself is the source root. Patches apply in
//! declaration order with strip level 1, and any failure leaves the
//! workspace in place for diagnosis.

use crate::error::{Error, Result};
use crate::host;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Unpack `archive` into `dest`, returning the detected source root.
pub fn extract(archive: &Path, dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;
    let filename = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let dest_str = dest.to_str().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination path is not valid UTF-8",
        ))
    })?;
    let archive_str = archive.to_str().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "archive path is not valid UTF-8",
        ))
    })?;

    let (program, args): (&str, Vec<&str>) = if filename.ends_with(".tar.gz")
        || filename.ends_with(".tgz")
    {
        ("tar", vec!["-xzf", archive_str, "-C", dest_str])
    } else if filename.ends_with(".tar.xz") || filename.ends_with(".txz") {
        ("tar", vec!["-xJf", archive_str, "-C", dest_str])
    } else if filename.ends_with(".tar.bz2") || filename.ends_with(".tbz2") {
        ("tar", vec!["-xjf", archive_str, "-C", dest_str])
    } else if filename.ends_with(".tar.zst") {
        ("tar", vec!["--zstd", "-xf", archive_str, "-C", dest_str])
    } else if filename.ends_with(".tar") {
        ("tar", vec!["-xf", archive_str, "-C", dest_str])
    } else if filename.ends_with(".zip") {
        ("unzip", vec!["-q", archive_str, "-d", dest_str])
    } else {
        return Err(Error::UnsupportedFormat(filename.to_string()));
    };

    host::require(program)?;
    let output = Command::new(program).args(&args).output()?;
    if !output.status.success() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "{} failed extracting {}: {}",
                program,
                filename,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        )));
    }

    let root = source_root(dest)?;
    debug!("extracted {} -> {}", filename, root.display());
    Ok(root)
}

/// Detect the source root after extraction: a single top-level directory
/// is promoted, anything else means the workspace is the root.
pub fn source_root(workspace: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(workspace)?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 {
        let only = &entries[0];
        if only.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            return Ok(only.path());
        }
    }
    Ok(workspace.to_path_buf())
}

/// Apply `patches` to `src_root` in declaration order with `-p1`.
///
/// The first failure aborts with the patch's index; the workspace is left
/// untouched beyond what already applied.
pub fn apply_patches(src_root: &Path, patches: &[PathBuf]) -> Result<()> {
    for (index, patch) in patches.iter().enumerate() {
        if !patch.exists() {
            return Err(Error::PatchFailed {
                index,
                reason: format!("patch file missing: {}", patch.display()),
            });
        }

        host::require("patch")?;
        info!("applying patch {}: {}", index, patch.display());
        let output = Command::new("patch")
            .args(["-p1", "--batch", "-i"])
            .arg(patch)
            .current_dir(src_root)
            .output()?;

        if !output.status.success() {
            return Err(Error::PatchFailed {
                index,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
    }
    Ok(())
}
